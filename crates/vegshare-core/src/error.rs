//! Error type shared by every vegshare-core component.
//!
//! Errors split into two families. Permanent errors ([`CoreError::NotFound`],
//! [`CoreError::InvalidStateTransition`], [`CoreError::Unauthorized`], ...)
//! abort the enclosing transaction and are surfaced unchanged; retrying them
//! can never succeed. Retryable errors ([`CoreError::StorageUnavailable`],
//! [`CoreError::StorageTimeout`], [`CoreError::Queue`]) come from
//! infrastructure and are requeued by the consumer or reported to HTTP
//! callers as "try again".

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Referenced operation, task, unit or catalog item does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The record is not in the state the requested transition starts from,
    /// either because it was never there or because a concurrent caller
    /// moved it first.
    #[error("{entity} {id} cannot move from '{from}' to '{to}'")]
    InvalidStateTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },

    /// Caller is not the assignee of an in-progress task.
    #[error("user {user_id} is not the assignee of task {task_id}")]
    Unauthorized { task_id: Uuid, user_id: Uuid },

    #[error("malformed parameters for action '{action}': {reason}")]
    MalformedActionParameters { action: String, reason: String },

    /// An operation was driven by the path it was not assigned to.
    #[error("operation {operation_id} runs in {mode} mode and cannot be driven by the {path}")]
    ExecutionModeMismatch {
        operation_id: Uuid,
        mode: String,
        path: &'static str,
    },

    #[error("operation {operation_id} already has task {task_id}")]
    DuplicateTask { operation_id: Uuid, task_id: Uuid },

    #[error("user {user_id} holds no active lease on unit {unit_id}")]
    NoActiveLease { user_id: Uuid, unit_id: Uuid },

    /// A queue message that can never be processed.
    #[error("poisoned delivery: {0}")]
    DeliveryPoisoned(String),

    /// A stored row could not be decoded into its domain type.
    #[error("corrupt {entity} record: {reason}")]
    CorruptRecord { entity: &'static str, reason: String },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("storage call exceeded {0:?}")]
    StorageTimeout(Duration),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The unit of work behind an automatic action failed.
    #[error("action execution failed: {reason}")]
    ExecutionFailed { reason: String, retryable: bool },
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn malformed(action: impl Into<String>, reason: impl ToString) -> Self {
        CoreError::MalformedActionParameters {
            action: action.into(),
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(entity: &'static str, reason: impl ToString) -> Self {
        CoreError::CorruptRecord {
            entity,
            reason: reason.to_string(),
        }
    }

    /// `true` when the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::StorageUnavailable(_)
            | CoreError::StorageTimeout(_)
            | CoreError::Queue(_) => true,
            CoreError::ExecutionFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn storage_failures_are_retryable() {
        assert!(CoreError::StorageUnavailable(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(CoreError::StorageTimeout(Duration::from_millis(5)).is_retryable());
        assert!(CoreError::Queue(QueueError::Closed).is_retryable());
    }

    #[test]
    fn domain_failures_are_permanent() {
        let id = Uuid::new_v4();
        assert!(!CoreError::not_found("task", id).is_retryable());
        assert!(!CoreError::Unauthorized { task_id: id, user_id: id }.is_retryable());
        assert!(!CoreError::malformed("plant", "missing field").is_retryable());
        assert!(!CoreError::DeliveryPoisoned("garbage".into()).is_retryable());
    }

    #[test]
    fn execution_failure_carries_its_own_classification() {
        let transient = CoreError::ExecutionFailed {
            reason: "valve busy".into(),
            retryable: true,
        };
        let fatal = CoreError::ExecutionFailed {
            reason: "valve missing".into(),
            retryable: false,
        };
        assert!(transient.is_retryable());
        assert!(!fatal.is_retryable());
    }
}
