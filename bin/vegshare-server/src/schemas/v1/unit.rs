use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use vegshare_core::entities::UnitContent;

#[derive(Debug, Serialize, ToSchema)]
pub struct UnitContentResponse {
    pub unit_id: Uuid,
    pub unit_type: String,
    pub item_id: Uuid,
    pub quantity: i64,
    pub updated_at: String,
}

impl From<UnitContent> for UnitContentResponse {
    fn from(c: UnitContent) -> Self {
        Self {
            unit_id: c.unit.unit_id,
            unit_type: c.unit.unit_type,
            item_id: c.item_id,
            quantity: c.quantity,
            updated_at: c.updated_at.to_rfc3339(),
        }
    }
}
