//! Per-unit views: operation history and current content.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;
use uuid::Uuid;
use vegshare_core::CoreError;
use vegshare_core::entities::{UnitContentStore, UnitRef};

use crate::error::ServerError;
use crate::schemas::v1::operation::OperationResponse;
use crate::schemas::v1::unit::UnitContentResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_unit_operations, get_unit_content),
    components(schemas(UnitContentResponse))
)]
pub struct UnitsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/units/{unit_type}/{unit_id}/operations", get(list_unit_operations))
        .route("/units/{unit_type}/{unit_id}/content", get(get_unit_content))
}

/// Operations on a unit, newest first.
#[utoipa::path(
    get,
    path = "/v1/units/{unit_type}/{unit_id}/operations",
    tag = "units",
    params(
        ("unit_type" = String, Path, description = "Unit type, e.g. plot"),
        ("unit_id" = Uuid, Path, description = "Unit id"),
    ),
    responses((status = 200, description = "Operations", body = [OperationResponse]))
)]
pub async fn list_unit_operations(
    State(state): State<Arc<AppState>>,
    Path((unit_type, unit_id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<OperationResponse>>, ServerError> {
    let ops = state
        .actions
        .list_for_unit(&UnitRef::new(unit_id, unit_type))
        .await?;
    Ok(Json(ops.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/v1/units/{unit_type}/{unit_id}/content",
    tag = "units",
    params(
        ("unit_type" = String, Path, description = "Unit type, e.g. plot"),
        ("unit_id" = Uuid, Path, description = "Unit id"),
    ),
    responses(
        (status = 200, description = "Current content", body = UnitContentResponse),
        (status = 404, description = "Unit is empty"),
    )
)]
pub async fn get_unit_content(
    State(state): State<Arc<AppState>>,
    Path((unit_type, unit_id)): Path<(String, Uuid)>,
) -> Result<Json<UnitContentResponse>, ServerError> {
    let unit = UnitRef::new(unit_id, unit_type);
    let content = state
        .store
        .get_unit_content(&unit)
        .await?
        .ok_or_else(|| CoreError::not_found("unit_content", unit_id))?;
    Ok(Json(content.into()))
}
