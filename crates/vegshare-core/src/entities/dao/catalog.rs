use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row in the `catalog_items` table (seeds, seedlings, fertiliser, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub item_type: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
