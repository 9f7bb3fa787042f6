use std::future::Future;

use chrono::Utc;
use sqlx::SqliteExecutor;
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, LeaseRecord, SqliteStore, UnitRef};
use crate::error::CoreError;

const ENTITY: &str = "lease";

/// Read-only view of the leasing module.
pub trait LeaseLookup: Send + Sync + 'static {
    /// Every lease the user holds, whatever its status.
    fn leases_for_user(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Vec<LeaseRecord>, CoreError>> + Send;

    /// `true` when one of the user's leases is active on `unit`.
    fn has_active_lease(
        &self,
        user_id: Uuid,
        unit: &UnitRef,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send {
        async move {
            let leases = self.leases_for_user(user_id).await?;
            Ok(leases
                .iter()
                .any(|lease| lease.is_active() && lease.unit.unit_id == unit.unit_id))
        }
    }
}

#[derive(sqlx::FromRow)]
struct LeaseRow {
    id: String,
    unit_id: String,
    unit_type: String,
    user_id: String,
    status: String,
    start_date: String,
    end_date: String,
    created_at: String,
}

impl TryFrom<LeaseRow> for LeaseRecord {
    type Error = CoreError;

    fn try_from(row: LeaseRow) -> Result<Self, Self::Error> {
        Ok(LeaseRecord {
            id: parse_uuid(&row.id, ENTITY)?,
            unit: UnitRef {
                unit_id: parse_uuid(&row.unit_id, ENTITY)?,
                unit_type: row.unit_type,
            },
            user_id: parse_uuid(&row.user_id, ENTITY)?,
            status: row.status,
            start_date: parse_timestamp(&row.start_date, ENTITY, "start_date")?,
            end_date: parse_timestamp(&row.end_date, ENTITY, "end_date")?,
            created_at: parse_timestamp(&row.created_at, ENTITY, "created_at")?,
        })
    }
}

pub async fn insert<'e, E>(executor: E, lease: &LeaseRecord) -> Result<(), CoreError>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO leases (id, unit_id, unit_type, user_id, status, start_date, end_date, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(lease.id.to_string())
    .bind(lease.unit.unit_id.to_string())
    .bind(&lease.unit.unit_type)
    .bind(lease.user_id.to_string())
    .bind(&lease.status)
    .bind(lease.start_date.to_rfc3339())
    .bind(lease.end_date.to_rfc3339())
    .bind(lease.created_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn list_for_user<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<LeaseRecord>, CoreError>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<LeaseRow> = sqlx::query_as(
        "SELECT id, unit_id, unit_type, user_id, status, start_date, end_date, created_at \
         FROM leases WHERE user_id = ?1 ORDER BY created_at DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(LeaseRecord::try_from).collect()
}

impl LeaseRecord {
    /// An active lease starting now and running for `days`.
    pub fn active(user_id: Uuid, unit: UnitRef, days: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            unit,
            user_id,
            status: super::dao::lease::LEASE_ACTIVE.to_owned(),
            start_date: now,
            end_date: now + chrono::Duration::days(days),
            created_at: now,
        }
    }
}

impl SqliteStore {
    /// Seed a lease. Lease management proper belongs to the leasing module.
    pub async fn insert_lease(&self, lease: &LeaseRecord) -> Result<(), CoreError> {
        insert(self.pool(), lease).await
    }
}

impl LeaseLookup for SqliteStore {
    async fn leases_for_user(&self, user_id: Uuid) -> Result<Vec<LeaseRecord>, CoreError> {
        list_for_user(self.pool(), user_id).await
    }
}
