//! Action submission and operation log endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::error::ServerError;
use crate::middleware::{AdminAccess, CallerId};
use crate::schemas::v1::operation::{CreateOperationRequest, OperationResponse, SubmissionResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(create_operation, get_operation, delete_operation),
    components(schemas(CreateOperationRequest, OperationResponse, SubmissionResponse))
)]
pub struct OperationsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/operations", post(create_operation))
        .route("/operations/{id}", get(get_operation).delete(delete_operation))
}

/// Submit an action on a unit.
///
/// Manual actions (`plant`, `harvest`) come back with a task in `new`;
/// other actions are queued for the worker.
#[utoipa::path(
    post,
    path = "/v1/operations",
    tag = "operations",
    request_body = CreateOperationRequest,
    params(("x-user-id" = Uuid, Header, description = "Calling user")),
    responses(
        (status = 201, description = "Operation recorded", body = SubmissionResponse),
        (status = 400, description = "Malformed action parameters"),
        (status = 403, description = "No active lease on the unit"),
        (status = 404, description = "Catalog item not found"),
        (status = 503, description = "Storage or queue unavailable, retry"),
    )
)]
pub async fn create_operation(
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Json(req): Json<CreateOperationRequest>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ServerError> {
    if req.unit_type.trim().is_empty() || req.action_type.trim().is_empty() {
        return Err(ServerError::BadRequest(
            "unit_type and action_type must not be empty".into(),
        ));
    }
    let submission = state
        .actions
        .submit(user_id, req.into_action_request())
        .await?;
    Ok((StatusCode::CREATED, Json(submission.into())))
}

#[utoipa::path(
    get,
    path = "/v1/operations/{id}",
    tag = "operations",
    params(("id" = Uuid, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Operation", body = OperationResponse),
        (status = 404, description = "Operation not found"),
    )
)]
pub async fn get_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResponse>, ServerError> {
    let op = state.actions.get_operation(id).await?;
    Ok(Json(op.into()))
}

/// Administrative purge of an operation and its task.
#[utoipa::path(
    delete,
    path = "/v1/operations/{id}",
    tag = "operations",
    params(("id" = Uuid, Path, description = "Operation id")),
    responses(
        (status = 204, description = "Operation purged"),
        (status = 401, description = "Admin token required"),
        (status = 404, description = "Operation not found"),
    )
)]
pub async fn delete_operation(
    _admin: AdminAccess,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServerError> {
    state.actions.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
