//! Persistence layer.
//!
//! [`SqliteStore`] owns the connection pool. Query functions in the
//! submodules are generic over [`sqlx::SqliteExecutor`], so the same
//! statement runs against the pool or against an open transaction
//! (`&mut *tx`). Multi-table transitions in [`crate::services`] always pass
//! the transaction handle for every table they touch.
//!
//! The store traits ([`OperationLogStore`], [`LeaseLookup`],
//! [`CatalogLookup`], [`UnitContentStore`]) use `impl Future` in their
//! signatures, so no `async-trait` crate is required.
//!
//! UUIDs and timestamps are stored as TEXT (RFC 3339 for timestamps).

pub mod catalog;
pub mod dao;
pub mod lease;
pub mod operation;
pub mod task;
pub mod unit_content;

pub use dao::{
    CatalogItem, ExecutionMode, LeaseRecord, OperationLog, OperationStatus, TaskRecord,
    TaskStatus, UnitContent, UnitRef,
};

pub use catalog::CatalogLookup;
pub use lease::LeaseLookup;
pub use operation::OperationLogStore;
pub use unit_content::UnitContentStore;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use crate::error::CoreError;

/// SQLite-backed store for operations, tasks, unit contents, leases and
/// catalog items.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending
    /// migrations.
    ///
    /// `timeout` bounds both pool acquisition and SQLite's busy wait, so no
    /// storage call blocks indefinitely.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    /// Private in-memory database, used by tests and `--database-url
    /// sqlite::memory:` runs.
    ///
    /// An in-memory SQLite database lives exactly as long as its connection,
    /// so the pool is pinned to a single connection that never expires.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a transaction that holds SQLite's write lock from the start.
    ///
    /// A deferred transaction that reads before writing fails with
    /// `SQLITE_BUSY` when another writer got there first. `BEGIN IMMEDIATE`
    /// queues behind the busy timeout instead, so a concurrent transition
    /// re-reads the committed state and loses with a stale-status error.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, CoreError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Round-trip a trivial query; used by health checks.
    pub async fn ping(&self) -> Result<(), CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// `true` when the database file is the private in-memory one, which
    /// other processes cannot reach.
    pub fn is_in_memory(url: &str) -> bool {
        url.contains(":memory:")
    }
}

// ── row decoding helpers ─────────────────────────────────────────────────────

pub(crate) fn parse_uuid(raw: &str, entity: &'static str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(raw).map_err(|e| CoreError::corrupt(entity, format!("bad uuid '{raw}': {e}")))
}

pub(crate) fn parse_optional_uuid(
    raw: Option<&str>,
    entity: &'static str,
) -> Result<Option<Uuid>, CoreError> {
    raw.map(|v| parse_uuid(v, entity)).transpose()
}

pub(crate) fn parse_enum<T: FromStr>(raw: &str, entity: &'static str) -> Result<T, CoreError> {
    raw.parse()
        .map_err(|_| CoreError::corrupt(entity, format!("unknown value '{raw}'")))
}

pub(crate) fn parse_timestamp(
    raw: &str,
    entity: &'static str,
    field: &'static str,
) -> Result<DateTime<Utc>, CoreError> {
    raw.parse()
        .map_err(|e| CoreError::corrupt(entity, format!("bad {field} '{raw}': {e}")))
}

pub(crate) fn parse_optional_timestamp(
    raw: Option<&str>,
    entity: &'static str,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, CoreError> {
    raw.map(|v| parse_timestamp(v, entity, field)).transpose()
}
