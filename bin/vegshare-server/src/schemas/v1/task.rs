use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use vegshare_core::entities::TaskRecord;

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct TaskStatusQuery {
    /// One of `new`, `in_progress`, `completed`, `failed`.
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    pub operation_id: Uuid,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskResponse {
    pub id: Uuid,
    pub operation_id: Uuid,
    pub assignee_id: Option<Uuid>,
    pub status: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TaskRecord> for TaskResponse {
    fn from(t: TaskRecord) -> Self {
        Self {
            id: t.id,
            operation_id: t.operation_id,
            assignee_id: t.assignee_id,
            status: t.status.to_string(),
            title: t.title,
            description: t.description,
            created_at: t.created_at.to_rfc3339(),
            updated_at: t.updated_at.to_rfc3339(),
        }
    }
}
