use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;
use uuid::Uuid;

use super::{
    parse_enum, parse_optional_uuid, parse_timestamp, parse_uuid, TaskRecord, TaskStatus,
};
use crate::error::CoreError;

const ENTITY: &str = "task";

const SELECT_TASK: &str = "SELECT id, operation_id, assignee_id, status, title, description, \
     created_at, updated_at FROM tasks";

impl TaskRecord {
    /// A fresh unassigned task in `new`.
    pub fn new(operation_id: Uuid, title: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            operation_id,
            assignee_id: None,
            status: TaskStatus::New,
            title: title.into(),
            // An empty description is stored as absent.
            description: description.filter(|d| !d.trim().is_empty()),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    operation_id: String,
    assignee_id: Option<String>,
    status: String,
    title: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(TaskRecord {
            id: parse_uuid(&row.id, ENTITY)?,
            operation_id: parse_uuid(&row.operation_id, ENTITY)?,
            assignee_id: parse_optional_uuid(row.assignee_id.as_deref(), ENTITY)?,
            status: parse_enum(&row.status, ENTITY)?,
            title: row.title,
            description: row.description,
            created_at: parse_timestamp(&row.created_at, ENTITY, "created_at")?,
            updated_at: parse_timestamp(&row.updated_at, ENTITY, "updated_at")?,
        })
    }
}

pub async fn insert<'e, E>(executor: E, task: &TaskRecord) -> Result<(), CoreError>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO tasks (id, operation_id, assignee_id, status, title, description, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(task.id.to_string())
    .bind(task.operation_id.to_string())
    .bind(task.assignee_id.map(|id| id.to_string()))
    .bind(task.status.as_str())
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.created_at.to_rfc3339())
    .bind(task.updated_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn fetch<'e, E>(executor: E, id: Uuid) -> Result<Option<TaskRecord>, CoreError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SELECT_TASK} WHERE id = ?1");
    let row: Option<TaskRow> = sqlx::query_as(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    row.map(TaskRecord::try_from).transpose()
}

pub async fn fetch_required<'e, E>(executor: E, id: Uuid) -> Result<TaskRecord, CoreError>
where
    E: SqliteExecutor<'e>,
{
    fetch(executor, id)
        .await?
        .ok_or_else(|| CoreError::not_found(ENTITY, id))
}

pub async fn fetch_by_operation<'e, E>(
    executor: E,
    operation_id: Uuid,
) -> Result<Option<TaskRecord>, CoreError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SELECT_TASK} WHERE operation_id = ?1");
    let row: Option<TaskRow> = sqlx::query_as(&sql)
        .bind(operation_id.to_string())
        .fetch_optional(executor)
        .await?;
    row.map(TaskRecord::try_from).transpose()
}

pub async fn list<'e, E>(executor: E, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, CoreError>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<TaskRow> = if let Some(status) = status {
        let sql = format!("{SELECT_TASK} WHERE status = ?1 ORDER BY created_at DESC");
        sqlx::query_as(&sql)
            .bind(status.as_str())
            .fetch_all(executor)
            .await?
    } else {
        let sql = format!("{SELECT_TASK} ORDER BY created_at DESC");
        sqlx::query_as(&sql).fetch_all(executor).await?
    };
    rows.into_iter().map(TaskRecord::try_from).collect()
}

/// Compare-and-set status write.
///
/// Only updates the row while it still holds `expected`; zero affected rows
/// means another caller moved the task first and is reported as
/// [`CoreError::InvalidStateTransition`]. `assignee` overwrites the current
/// assignee when `Some`, otherwise the existing value is kept.
pub async fn transition<'e, E>(
    executor: E,
    id: Uuid,
    expected: TaskStatus,
    next: TaskStatus,
    assignee: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<(), CoreError>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE tasks SET status = ?1, assignee_id = COALESCE(?2, assignee_id), updated_at = ?3 \
         WHERE id = ?4 AND status = ?5",
    )
    .bind(next.as_str())
    .bind(assignee.map(|id| id.to_string()))
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .bind(expected.as_str())
    .execute(executor)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::InvalidStateTransition {
            entity: ENTITY,
            id,
            from: expected.to_string(),
            to: next.to_string(),
        });
    }
    Ok(())
}
