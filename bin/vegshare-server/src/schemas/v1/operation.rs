use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use vegshare_core::entities::{OperationLog, UnitRef};
use vegshare_core::services::{ActionRequest, Submission};

use super::task::TaskResponse;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOperationRequest {
    pub unit_id: Uuid,
    /// e.g. `"plot"`.
    pub unit_type: String,
    /// `plant`, `water`, `harvest` or any other action name.
    pub action_type: String,
    /// Per-action payload; `plant` requires `{"item_id", "quantity"}`.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: serde_json::Value,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl CreateOperationRequest {
    pub fn into_action_request(self) -> ActionRequest {
        ActionRequest {
            unit: UnitRef::new(self.unit_id, self.unit_type),
            action_type: self.action_type,
            parameters: self.parameters,
            title: self.title,
            description: self.description,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OperationResponse {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub unit_type: String,
    pub user_id: Uuid,
    pub action_type: String,
    #[schema(value_type = Object)]
    pub parameters: serde_json::Value,
    pub status: String,
    pub execution_mode: String,
    pub executed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<OperationLog> for OperationResponse {
    fn from(op: OperationLog) -> Self {
        Self {
            id: op.id,
            unit_id: op.unit.unit_id,
            unit_type: op.unit.unit_type,
            user_id: op.user_id,
            action_type: op.action_type,
            parameters: op.parameters,
            status: op.status.to_string(),
            execution_mode: op.execution_mode.to_string(),
            executed_at: op.executed_at.map(|t| t.to_rfc3339()),
            created_at: op.created_at.to_rfc3339(),
            updated_at: op.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmissionResponse {
    pub operation: OperationResponse,
    /// Present for manual actions.
    pub task: Option<TaskResponse>,
}

impl From<Submission> for SubmissionResponse {
    fn from(s: Submission) -> Self {
        Self {
            operation: s.operation.into(),
            task: s.task.map(Into::into),
        }
    }
}
