use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, SqliteStore, UnitContent, UnitRef};
use crate::error::CoreError;

const ENTITY: &str = "unit_content";

/// What currently occupies a unit.
///
/// Knows nothing about operations or tasks; the orchestrator calls
/// [`upsert`] inside its own transaction, everyone else goes through this
/// trait.
pub trait UnitContentStore: Send + Sync + 'static {
    /// Insert-or-replace keyed by `(unit_id, unit_type)`.
    fn set_unit_content(
        &self,
        unit: &UnitRef,
        item_id: Uuid,
        quantity: i64,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    fn get_unit_content(
        &self,
        unit: &UnitRef,
    ) -> impl Future<Output = Result<Option<UnitContent>, CoreError>> + Send;
}

#[derive(sqlx::FromRow)]
struct UnitContentRow {
    id: String,
    unit_id: String,
    unit_type: String,
    item_id: String,
    quantity: i64,
    updated_at: String,
}

impl TryFrom<UnitContentRow> for UnitContent {
    type Error = CoreError;

    fn try_from(row: UnitContentRow) -> Result<Self, Self::Error> {
        Ok(UnitContent {
            id: parse_uuid(&row.id, ENTITY)?,
            unit: UnitRef {
                unit_id: parse_uuid(&row.unit_id, ENTITY)?,
                unit_type: row.unit_type,
            },
            item_id: parse_uuid(&row.item_id, ENTITY)?,
            quantity: row.quantity,
            updated_at: parse_timestamp(&row.updated_at, ENTITY, "updated_at")?,
        })
    }
}

/// Single-statement upsert (`INSERT … ON CONFLICT DO UPDATE`), so concurrent
/// writers to the same unit cannot lose updates the way a read-then-write
/// would. The fresh `id` is only used when no row exists yet.
pub async fn upsert<'e, E>(
    executor: E,
    unit: &UnitRef,
    item_id: Uuid,
    quantity: i64,
    now: DateTime<Utc>,
) -> Result<(), CoreError>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO unit_contents (id, unit_id, unit_type, item_id, quantity, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT (unit_id, unit_type) DO UPDATE \
         SET item_id = excluded.item_id, quantity = excluded.quantity, updated_at = excluded.updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(unit.unit_id.to_string())
    .bind(&unit.unit_type)
    .bind(item_id.to_string())
    .bind(quantity)
    .bind(now.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn fetch<'e, E>(executor: E, unit: &UnitRef) -> Result<Option<UnitContent>, CoreError>
where
    E: SqliteExecutor<'e>,
{
    let row: Option<UnitContentRow> = sqlx::query_as(
        "SELECT id, unit_id, unit_type, item_id, quantity, updated_at \
         FROM unit_contents WHERE unit_id = ?1 AND unit_type = ?2",
    )
    .bind(unit.unit_id.to_string())
    .bind(&unit.unit_type)
    .fetch_optional(executor)
    .await?;
    row.map(UnitContent::try_from).transpose()
}

impl UnitContentStore for SqliteStore {
    async fn set_unit_content(
        &self,
        unit: &UnitRef,
        item_id: Uuid,
        quantity: i64,
    ) -> Result<(), CoreError> {
        upsert(self.pool(), unit, item_id, quantity, Utc::now()).await
    }

    async fn get_unit_content(&self, unit: &UnitRef) -> Result<Option<UnitContent>, CoreError> {
        fetch(self.pool(), unit).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn row_count(store: &SqliteStore) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM unit_contents")
            .fetch_one(store.pool())
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn second_set_overwrites_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        let unit = UnitRef::new(Uuid::new_v4(), "plot");
        let tomato = Uuid::new_v4();
        let basil = Uuid::new_v4();

        store.set_unit_content(&unit, tomato, 3).await.unwrap();
        let first = store.get_unit_content(&unit).await.unwrap().unwrap();
        store.set_unit_content(&unit, basil, 7).await.unwrap();
        let second = store.get_unit_content(&unit).await.unwrap().unwrap();

        assert_eq!(row_count(&store).await, 1);
        assert_eq!(second.item_id, basil);
        assert_eq!(second.quantity, 7);
        assert_eq!(first.id, second.id, "upsert keeps the original row identity");
    }

    #[tokio::test]
    async fn same_unit_id_with_different_type_is_a_different_unit() {
        let store = SqliteStore::in_memory().await.unwrap();
        let unit_id = Uuid::new_v4();
        let item = Uuid::new_v4();

        store
            .set_unit_content(&UnitRef::new(unit_id, "plot"), item, 1)
            .await
            .unwrap();
        store
            .set_unit_content(&UnitRef::new(unit_id, "hive"), item, 2)
            .await
            .unwrap();

        assert_eq!(row_count(&store).await, 2);
    }

    #[tokio::test]
    async fn empty_unit_has_no_content() {
        let store = SqliteStore::in_memory().await.unwrap();
        let unit = UnitRef::new(Uuid::new_v4(), "plot");
        assert!(store.get_unit_content(&unit).await.unwrap().is_none());
    }
}
