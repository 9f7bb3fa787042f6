use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;
use uuid::Uuid;

use super::{
    parse_enum, parse_optional_timestamp, parse_timestamp, parse_uuid, ExecutionMode,
    OperationLog, OperationStatus, SqliteStore, UnitRef,
};
use crate::error::CoreError;

const ENTITY: &str = "operation";

const SELECT_OPERATION: &str = "SELECT id, unit_id, unit_type, user_id, action_type, parameters, \
     status, execution_mode, executed_at, created_at, updated_at FROM operation_logs";

/// Operation-log access needed outside a multi-table transaction: by the
/// queue consumer, the submission path and administrative tooling.
pub trait OperationLogStore: Send + Sync + 'static {
    fn insert_operation(
        &self,
        operation: &OperationLog,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    fn get_operation(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<OperationLog>, CoreError>> + Send;

    /// Set the status to a fixed value. Repeating the call is harmless, which
    /// the queue consumer relies on under redelivery.
    fn update_operation_status(
        &self,
        id: Uuid,
        status: OperationStatus,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    fn list_operations_for_unit(
        &self,
        unit: &UnitRef,
    ) -> impl Future<Output = Result<Vec<OperationLog>, CoreError>> + Send;

    /// Administrative delete. The linked task goes with it (FK cascade).
    /// Returns `false` when nothing matched.
    fn purge_operation(&self, id: Uuid) -> impl Future<Output = Result<bool, CoreError>> + Send;
}

impl OperationLog {
    /// A fresh `pending` operation.
    pub fn new(
        user_id: Uuid,
        unit: UnitRef,
        action_type: impl Into<String>,
        parameters: serde_json::Value,
        execution_mode: ExecutionMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            unit,
            user_id,
            action_type: action_type.into(),
            parameters,
            status: OperationStatus::Pending,
            execution_mode,
            executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    unit_id: String,
    unit_type: String,
    user_id: String,
    action_type: String,
    parameters: String,
    status: String,
    execution_mode: String,
    executed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<OperationRow> for OperationLog {
    type Error = CoreError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let parameters = serde_json::from_str(&row.parameters).map_err(|e| {
            CoreError::corrupt(ENTITY, format!("parameters of {} are not JSON: {e}", row.id))
        })?;
        Ok(OperationLog {
            id: parse_uuid(&row.id, ENTITY)?,
            unit: UnitRef {
                unit_id: parse_uuid(&row.unit_id, ENTITY)?,
                unit_type: row.unit_type,
            },
            user_id: parse_uuid(&row.user_id, ENTITY)?,
            action_type: row.action_type,
            parameters,
            status: parse_enum(&row.status, ENTITY)?,
            execution_mode: parse_enum(&row.execution_mode, ENTITY)?,
            executed_at: parse_optional_timestamp(row.executed_at.as_deref(), ENTITY, "executed_at")?,
            created_at: parse_timestamp(&row.created_at, ENTITY, "created_at")?,
            updated_at: parse_timestamp(&row.updated_at, ENTITY, "updated_at")?,
        })
    }
}

// ── executor-generic queries ─────────────────────────────────────────────────

pub async fn insert<'e, E>(executor: E, operation: &OperationLog) -> Result<(), CoreError>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO operation_logs \
         (id, unit_id, unit_type, user_id, action_type, parameters, status, execution_mode, \
          executed_at, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )
    .bind(operation.id.to_string())
    .bind(operation.unit.unit_id.to_string())
    .bind(&operation.unit.unit_type)
    .bind(operation.user_id.to_string())
    .bind(&operation.action_type)
    .bind(operation.parameters.to_string())
    .bind(operation.status.as_str())
    .bind(operation.execution_mode.as_str())
    .bind(operation.executed_at.map(|t| t.to_rfc3339()))
    .bind(operation.created_at.to_rfc3339())
    .bind(operation.updated_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn fetch<'e, E>(executor: E, id: Uuid) -> Result<Option<OperationLog>, CoreError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SELECT_OPERATION} WHERE id = ?1");
    let row: Option<OperationRow> = sqlx::query_as(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    row.map(OperationLog::try_from).transpose()
}

pub async fn fetch_required<'e, E>(executor: E, id: Uuid) -> Result<OperationLog, CoreError>
where
    E: SqliteExecutor<'e>,
{
    fetch(executor, id)
        .await?
        .ok_or_else(|| CoreError::not_found(ENTITY, id))
}

/// Idempotent status write. `executed_at` is stamped the first time the
/// operation reaches a terminal status and kept on repeats.
pub async fn set_status<'e, E>(
    executor: E,
    id: Uuid,
    status: OperationStatus,
    now: DateTime<Utc>,
) -> Result<(), CoreError>
where
    E: SqliteExecutor<'e>,
{
    let now = now.to_rfc3339();
    let executed_at = status.is_terminal().then(|| now.clone());
    let result = sqlx::query(
        "UPDATE operation_logs \
         SET status = ?1, updated_at = ?2, executed_at = COALESCE(executed_at, ?3) \
         WHERE id = ?4",
    )
    .bind(status.as_str())
    .bind(&now)
    .bind(executed_at)
    .bind(id.to_string())
    .execute(executor)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::not_found(ENTITY, id));
    }
    Ok(())
}

pub async fn list_for_unit<'e, E>(executor: E, unit: &UnitRef) -> Result<Vec<OperationLog>, CoreError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SELECT_OPERATION} WHERE unit_id = ?1 AND unit_type = ?2 ORDER BY created_at DESC");
    let rows: Vec<OperationRow> = sqlx::query_as(&sql)
        .bind(unit.unit_id.to_string())
        .bind(&unit.unit_type)
        .fetch_all(executor)
        .await?;
    rows.into_iter().map(OperationLog::try_from).collect()
}

pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<bool, CoreError>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM operation_logs WHERE id = ?1")
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

impl OperationLogStore for SqliteStore {
    async fn insert_operation(&self, operation: &OperationLog) -> Result<(), CoreError> {
        insert(self.pool(), operation).await
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<OperationLog>, CoreError> {
        fetch(self.pool(), id).await
    }

    async fn update_operation_status(
        &self,
        id: Uuid,
        status: OperationStatus,
    ) -> Result<(), CoreError> {
        set_status(self.pool(), id, status, Utc::now()).await
    }

    async fn list_operations_for_unit(&self, unit: &UnitRef) -> Result<Vec<OperationLog>, CoreError> {
        list_for_unit(self.pool(), unit).await
    }

    async fn purge_operation(&self, id: Uuid) -> Result<bool, CoreError> {
        delete(self.pool(), id).await
    }
}
