use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::ServerError;
use crate::state::AppState;

pub static X_USER_ID: &str = "x-user-id";

/// The calling user, from the `x-user-id` header. Credential checks happen
/// upstream of this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(X_USER_ID)
            .ok_or_else(|| ServerError::Unauthenticated(format!("missing {X_USER_ID} header")))?;
        raw.to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(CallerId)
            .ok_or_else(|| ServerError::BadRequest(format!("{X_USER_ID} must be a UUID")))
    }
}

/// Guard for administrative handlers, as an extractor so admin and public
/// methods can share a path. Open when no admin token is configured.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

impl FromRequestParts<Arc<AppState>> for AdminAccess {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_token.as_deref() else {
            return Ok(AdminAccess);
        };
        let provided = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected) {
            return Err(ServerError::Unauthenticated("admin token required".into()));
        }
        Ok(AdminAccess)
    }
}
