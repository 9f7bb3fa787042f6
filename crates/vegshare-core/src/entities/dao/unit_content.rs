use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::operation::UnitRef;

/// Current occupant of a unit. At most one per `(unit_id, unit_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitContent {
    pub id: Uuid,
    pub unit: UnitRef,
    /// References a catalog item.
    pub item_id: Uuid,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}
