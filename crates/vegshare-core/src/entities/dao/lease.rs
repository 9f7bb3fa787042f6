use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::operation::UnitRef;

pub const LEASE_ACTIVE: &str = "active";

/// A user's lease on a unit. `status` is free text owned by the leasing
/// module (`"active"`, `"expired"`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub id: Uuid,
    pub unit: UnitRef,
    pub user_id: Uuid,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_active(&self) -> bool {
        self.status == LEASE_ACTIVE
    }
}
