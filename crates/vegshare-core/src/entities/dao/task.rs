use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use super::operation::OperationStatus;

/// Lifecycle of a human task: `new → in_progress → {completed | failed}`.
/// A `new` task may also fail directly (administrative abort).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    New,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::New, TaskStatus::InProgress)
                | (TaskStatus::New, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }

    /// The operation status that must accompany this task status.
    pub fn operation_status(self) -> OperationStatus {
        match self {
            TaskStatus::New => OperationStatus::Pending,
            TaskStatus::InProgress => OperationStatus::InProgress,
            TaskStatus::Completed => OperationStatus::Completed,
            TaskStatus::Failed => OperationStatus::Failed,
        }
    }
}

/// A row in the `tasks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub operation_id: Uuid,
    /// Unset until the task is accepted.
    pub assignee_id: Option<Uuid>,
    pub status: TaskStatus,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    const ALL: [TaskStatus; 4] = [
        TaskStatus::New,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    #[test]
    fn terminal_states_accept_no_transition() {
        for from in [TaskStatus::Completed, TaskStatus::Failed] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn new_task_cannot_skip_to_completed() {
        assert!(!TaskStatus::New.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::New.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::New.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn status_strings_match_storage_format() {
        assert_eq!(TaskStatus::InProgress.as_str(), "in_progress");
        assert_eq!("completed".parse::<TaskStatus>().ok(), Some(TaskStatus::Completed));
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_maps_onto_operation_status() {
        assert_eq!(TaskStatus::New.operation_status(), OperationStatus::Pending);
        assert_eq!(TaskStatus::Failed.operation_status(), OperationStatus::Failed);
    }
}
