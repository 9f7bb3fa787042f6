use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Execution status of an operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

/// Which path is allowed to drive an operation: a human task or the queue
/// consumer. Fixed when the operation is created.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionMode {
    Manual,
    Automatic,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// An addressable slot (plot, hive, greenhouse bed, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub unit_id: Uuid,
    pub unit_type: String,
}

impl UnitRef {
    pub fn new(unit_id: Uuid, unit_type: impl Into<String>) -> Self {
        Self {
            unit_id,
            unit_type: unit_type.into(),
        }
    }
}

/// A row in the `operation_logs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    pub id: Uuid,
    pub unit: UnitRef,
    pub user_id: Uuid,
    pub action_type: String,
    /// Schema-less per action; decode with [`crate::action::ActionParams`].
    pub parameters: serde_json::Value,
    pub status: OperationStatus,
    pub execution_mode: ExecutionMode,
    /// Set when the operation reaches a terminal status.
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
