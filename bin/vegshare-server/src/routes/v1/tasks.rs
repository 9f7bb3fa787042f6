//! Field task endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use utoipa::OpenApi;
use uuid::Uuid;
use vegshare_core::entities::TaskStatus;

use crate::error::ServerError;
use crate::middleware::{AdminAccess, CallerId};
use crate::schemas::v1::task::{CreateTaskRequest, TaskResponse, TaskStatusQuery};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_tasks, get_task, create_task, accept_task, complete_task, fail_task),
    components(schemas(TaskResponse, TaskStatusQuery, CreateTaskRequest))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/accept", post(accept_task))
        .route("/tasks/{id}/complete", post(complete_task))
        .route("/tasks/{id}/fail", post(fail_task))
}

#[utoipa::path(
    get,
    path = "/v1/tasks",
    tag = "tasks",
    params(TaskStatusQuery),
    responses(
        (status = 200, description = "Tasks, newest first", body = [TaskResponse]),
        (status = 400, description = "Unknown status filter"),
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TaskStatusQuery>,
) -> Result<Json<Vec<TaskResponse>>, ServerError> {
    let status = q
        .status
        .as_deref()
        .map(|s| {
            s.parse::<TaskStatus>()
                .map_err(|_| ServerError::BadRequest(format!("unknown task status '{s}'")))
        })
        .transpose()?;
    let tasks = state.orchestrator.list_tasks(status).await?;
    Ok(Json(tasks.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task", body = TaskResponse),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, ServerError> {
    Ok(Json(state.orchestrator.get_task(id).await?.into()))
}

/// Create a task for an existing manual operation that has none.
#[utoipa::path(
    post,
    path = "/v1/tasks",
    tag = "tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created", body = TaskResponse),
        (status = 401, description = "Admin token required"),
        (status = 404, description = "Operation not found"),
        (status = 409, description = "Operation is automatic, not pending, or already has a task"),
    )
)]
pub async fn create_task(
    _admin: AdminAccess,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ServerError> {
    if req.title.trim().is_empty() {
        return Err(ServerError::BadRequest("title must not be empty".into()));
    }
    let task = state
        .orchestrator
        .create_task(req.operation_id, &req.title, req.description)
        .await?;
    Ok((StatusCode::CREATED, Json(task.into())))
}

#[utoipa::path(
    post,
    path = "/v1/tasks/{id}/accept",
    tag = "tasks",
    params(
        ("id" = Uuid, Path, description = "Task id"),
        ("x-user-id" = Uuid, Header, description = "Calling user"),
    ),
    responses(
        (status = 200, description = "Task accepted", body = TaskResponse),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task is not new"),
    )
)]
pub async fn accept_task(
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, ServerError> {
    Ok(Json(state.orchestrator.accept_task(id, user_id).await?.into()))
}

#[utoipa::path(
    post,
    path = "/v1/tasks/{id}/complete",
    tag = "tasks",
    params(
        ("id" = Uuid, Path, description = "Task id"),
        ("x-user-id" = Uuid, Header, description = "Calling user"),
    ),
    responses(
        (status = 200, description = "Task completed", body = TaskResponse),
        (status = 400, description = "Operation parameters are malformed"),
        (status = 403, description = "Caller is not the assignee"),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task is not in progress"),
    )
)]
pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, ServerError> {
    Ok(Json(state.orchestrator.complete_task(id, user_id).await?.into()))
}

#[utoipa::path(
    post,
    path = "/v1/tasks/{id}/fail",
    tag = "tasks",
    params(
        ("id" = Uuid, Path, description = "Task id"),
        ("x-user-id" = Uuid, Header, description = "Calling user"),
    ),
    responses(
        (status = 200, description = "Task failed", body = TaskResponse),
        (status = 403, description = "Caller is not the assignee"),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task already finished"),
    )
)]
pub async fn fail_task(
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, ServerError> {
    Ok(Json(state.orchestrator.fail_task(id, user_id).await?.into()))
}
