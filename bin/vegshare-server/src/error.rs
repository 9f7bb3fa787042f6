//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors turn into a JSON body with a
//! matching status code.
//!
//! Storage and internal failures are logged in full but only a generic
//! message reaches the caller, so SQL and file paths never leak.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use vegshare_core::CoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No usable caller identity or admin token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
            ServerError::Core(e) => core_status(e),
        }
    }
}

fn core_status(e: &CoreError) -> (StatusCode, String) {
    match e {
        CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, e.to_string()),
        CoreError::InvalidStateTransition { .. }
        | CoreError::ExecutionModeMismatch { .. }
        | CoreError::DuplicateTask { .. } => (StatusCode::CONFLICT, e.to_string()),
        CoreError::Unauthorized { .. } | CoreError::NoActiveLease { .. } => {
            (StatusCode::FORBIDDEN, e.to_string())
        }
        CoreError::MalformedActionParameters { .. } | CoreError::DeliveryPoisoned(_) => {
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        _ if e.is_retryable() => {
            warn!(error = %e, "retryable backend failure");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "temporarily unavailable, retry later".to_owned(),
            )
        }
        _ => {
            error!(error = %e, "internal core error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = self.status_and_message();
        let mut body = json!({ "error": client_message });
        if status == StatusCode::SERVICE_UNAVAILABLE {
            body["retryable"] = json!(true);
        }
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    fn status(e: CoreError) -> StatusCode {
        ServerError::from(e).into_response().status()
    }

    #[test]
    fn domain_errors_map_to_client_statuses() {
        let id = Uuid::new_v4();
        assert_eq!(status(CoreError::not_found("task", id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status(CoreError::InvalidStateTransition {
                entity: "task",
                id,
                from: "completed".into(),
                to: "failed".into(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(CoreError::Unauthorized { task_id: id, user_id: id }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status(CoreError::malformed("plant", "bad")), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn infrastructure_errors_are_retryable_503() {
        assert_eq!(
            status(CoreError::StorageTimeout(Duration::from_secs(1))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(CoreError::Queue(vegshare_core::queue::QueueError::Closed)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn corrupt_records_are_hidden_behind_500() {
        let response = ServerError::from(CoreError::corrupt("task", "bad uuid")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
