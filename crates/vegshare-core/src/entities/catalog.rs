use std::future::Future;

use chrono::Utc;
use sqlx::SqliteExecutor;
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, CatalogItem, SqliteStore};
use crate::error::CoreError;

const ENTITY: &str = "catalog_item";

/// Read-only view of the item catalog.
pub trait CatalogLookup: Send + Sync + 'static {
    fn item_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<CatalogItem>, CoreError>> + Send;
}

#[derive(sqlx::FromRow)]
struct CatalogRow {
    id: String,
    item_type: String,
    name: String,
    description: Option<String>,
    created_at: String,
}

impl TryFrom<CatalogRow> for CatalogItem {
    type Error = CoreError;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        Ok(CatalogItem {
            id: parse_uuid(&row.id, ENTITY)?,
            item_type: row.item_type,
            name: row.name,
            description: row.description,
            created_at: parse_timestamp(&row.created_at, ENTITY, "created_at")?,
        })
    }
}

impl CatalogItem {
    pub fn new(item_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_type: item_type.into(),
            name: name.into(),
            description: None,
            created_at: Utc::now(),
        }
    }
}

pub async fn insert<'e, E>(executor: E, item: &CatalogItem) -> Result<(), CoreError>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO catalog_items (id, item_type, name, description, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(item.id.to_string())
    .bind(&item.item_type)
    .bind(&item.name)
    .bind(&item.description)
    .bind(item.created_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn fetch<'e, E>(executor: E, id: Uuid) -> Result<Option<CatalogItem>, CoreError>
where
    E: SqliteExecutor<'e>,
{
    let row: Option<CatalogRow> = sqlx::query_as(
        "SELECT id, item_type, name, description, created_at FROM catalog_items WHERE id = ?1",
    )
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;
    row.map(CatalogItem::try_from).transpose()
}

impl SqliteStore {
    pub async fn insert_catalog_item(&self, item: &CatalogItem) -> Result<(), CoreError> {
        insert(self.pool(), item).await
    }
}

impl CatalogLookup for SqliteStore {
    async fn item_by_id(&self, id: Uuid) -> Result<Option<CatalogItem>, CoreError> {
        fetch(self.pool(), id).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn lookup_by_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        let item = CatalogItem::new("seed", "Tomato");
        store.insert_catalog_item(&item).await.unwrap();

        let found = store.item_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Tomato");
        assert!(store.item_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}
