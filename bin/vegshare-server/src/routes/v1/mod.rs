pub mod operations;
pub mod tasks;
pub mod units;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

/// Routes nested under `/v1`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(operations::router())
        .merge(units::router())
        .merge(tasks::router())
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut doc = V1Api::openapi();
    doc.merge(operations::OperationsApi::openapi());
    doc.merge(units::UnitsApi::openapi());
    doc.merge(tasks::TasksApi::openapi());
    doc
}
