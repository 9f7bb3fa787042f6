use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use crate::entities::{
    operation, task, unit_content, ExecutionMode, OperationStatus, SqliteStore, TaskRecord,
    TaskStatus,
};
use crate::error::CoreError;

/// Drives tasks through `new → in_progress → {completed | failed}`.
///
/// Every transition runs in one SQLite transaction that writes the task,
/// its operation and (for completed plant work) the unit content. Any
/// error drops the transaction, which rolls all of it back.
#[derive(Clone, Debug)]
pub struct TaskOrchestrator {
    store: SqliteStore,
    timeout: Duration,
}

impl TaskOrchestrator {
    pub fn new(store: SqliteStore, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Bound a storage call. On expiry the future is dropped, and with it
    /// any open transaction.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CoreError::StorageTimeout(self.timeout))?
    }

    pub async fn create_task(
        &self,
        operation_id: Uuid,
        title: &str,
        description: Option<String>,
    ) -> Result<TaskRecord, CoreError> {
        let task = self
            .bounded(async {
                let mut tx = self.store.begin_write().await?;
                let task = insert_task_for(&mut tx, operation_id, title, description).await?;
                tx.commit().await?;
                Ok(task)
            })
            .await?;

        info!(task_id = %task.id, operation_id = %operation_id, "task created");
        Ok(task)
    }

    /// `new → in_progress`, assigning the task to `user_id`.
    pub async fn accept_task(&self, task_id: Uuid, user_id: Uuid) -> Result<TaskRecord, CoreError> {
        let task = self
            .bounded(async {
                let mut tx = self.store.begin_write().await?;
                let current = task::fetch_required(&mut *tx, task_id).await?;
                require_status(&current, TaskStatus::New, TaskStatus::InProgress)?;

                let now = Utc::now();
                task::transition(
                    &mut *tx,
                    task_id,
                    TaskStatus::New,
                    TaskStatus::InProgress,
                    Some(user_id),
                    now,
                )
                .await?;
                operation::set_status(&mut *tx, current.operation_id, OperationStatus::InProgress, now)
                    .await?;

                let updated = task::fetch_required(&mut *tx, task_id).await?;
                tx.commit().await?;
                Ok(updated)
            })
            .await?;

        info!(task_id = %task_id, user_id = %user_id, operation_id = %task.operation_id, "task accepted");
        Ok(task)
    }

    /// `in_progress → completed`, by the assignee only. A plant operation
    /// also records its item and quantity as the unit's content.
    pub async fn complete_task(
        &self,
        task_id: Uuid,
        user_id: Uuid,
    ) -> Result<TaskRecord, CoreError> {
        let task = self
            .bounded(async {
                let mut tx = self.store.begin_write().await?;
                let current = task::fetch_required(&mut *tx, task_id).await?;
                require_status(&current, TaskStatus::InProgress, TaskStatus::Completed)?;
                if current.assignee_id != Some(user_id) {
                    return Err(CoreError::Unauthorized { task_id, user_id });
                }

                let op = operation::fetch_required(&mut *tx, current.operation_id).await?;
                let plant = op.plant_params()?;

                let now = Utc::now();
                task::transition(
                    &mut *tx,
                    task_id,
                    TaskStatus::InProgress,
                    TaskStatus::Completed,
                    None,
                    now,
                )
                .await?;
                operation::set_status(&mut *tx, op.id, OperationStatus::Completed, now).await?;
                if let Some(plant) = plant {
                    unit_content::upsert(&mut *tx, &op.unit, plant.item_id, plant.quantity, now)
                        .await?;
                }

                let updated = task::fetch_required(&mut *tx, task_id).await?;
                tx.commit().await?;
                Ok(updated)
            })
            .await?;

        info!(task_id = %task_id, user_id = %user_id, operation_id = %task.operation_id, "task completed");
        Ok(task)
    }

    /// Any non-terminal state → `failed`. Once a task is in progress only
    /// its assignee may fail it; a `new` task may be failed by anyone.
    pub async fn fail_task(&self, task_id: Uuid, user_id: Uuid) -> Result<TaskRecord, CoreError> {
        let task = self
            .bounded(async {
                let mut tx = self.store.begin_write().await?;
                let current = task::fetch_required(&mut *tx, task_id).await?;
                if current.status.is_terminal() {
                    return Err(invalid_transition(&current, TaskStatus::Failed));
                }
                if current.status == TaskStatus::InProgress
                    && current.assignee_id.is_some_and(|assignee| assignee != user_id)
                {
                    return Err(CoreError::Unauthorized { task_id, user_id });
                }

                let now = Utc::now();
                task::transition(&mut *tx, task_id, current.status, TaskStatus::Failed, None, now)
                    .await?;
                operation::set_status(&mut *tx, current.operation_id, OperationStatus::Failed, now)
                    .await?;

                let updated = task::fetch_required(&mut *tx, task_id).await?;
                tx.commit().await?;
                Ok(updated)
            })
            .await?;

        info!(task_id = %task_id, user_id = %user_id, operation_id = %task.operation_id, "task failed");
        Ok(task)
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<TaskRecord, CoreError> {
        self.bounded(task::fetch_required(self.store.pool(), task_id))
            .await
    }

    /// Newest first, optionally restricted to one status.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, CoreError> {
        self.bounded(task::list(self.store.pool(), status)).await
    }
}

/// Insert a `new` task for a pending manual operation on an open
/// connection, normally a transaction that also created the operation.
pub(crate) async fn insert_task_for(
    conn: &mut SqliteConnection,
    operation_id: Uuid,
    title: &str,
    description: Option<String>,
) -> Result<TaskRecord, CoreError> {
    let op = operation::fetch_required(&mut *conn, operation_id).await?;
    if op.execution_mode != ExecutionMode::Manual {
        return Err(CoreError::ExecutionModeMismatch {
            operation_id,
            mode: op.execution_mode.to_string(),
            path: "task orchestrator",
        });
    }
    if let Some(existing) = task::fetch_by_operation(&mut *conn, operation_id).await? {
        return Err(CoreError::DuplicateTask {
            operation_id,
            task_id: existing.id,
        });
    }
    // A task starts in `new`, which mirrors a pending operation.
    if op.status != OperationStatus::Pending {
        return Err(CoreError::InvalidStateTransition {
            entity: "operation",
            id: operation_id,
            from: op.status.to_string(),
            to: TaskStatus::New.operation_status().to_string(),
        });
    }

    let task = TaskRecord::new(operation_id, title, description);
    task::insert(&mut *conn, &task).await?;
    Ok(task)
}

fn require_status(task: &TaskRecord, expected: TaskStatus, next: TaskStatus) -> Result<(), CoreError> {
    if task.status != expected || !task.status.can_transition_to(next) {
        return Err(invalid_transition(task, next));
    }
    Ok(())
}

fn invalid_transition(task: &TaskRecord, next: TaskStatus) -> CoreError {
    CoreError::InvalidStateTransition {
        entity: "task",
        id: task.id,
        from: task.status.to_string(),
        to: next.to_string(),
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::entities::{OperationLog, OperationLogStore, UnitContentStore, UnitRef};

    async fn setup() -> (TaskOrchestrator, SqliteStore) {
        let store = SqliteStore::in_memory().await.unwrap();
        (TaskOrchestrator::new(store.clone(), Duration::from_secs(5)), store)
    }

    async fn manual_op(store: &SqliteStore, action: &str, parameters: serde_json::Value) -> OperationLog {
        let op = OperationLog::new(
            Uuid::new_v4(),
            UnitRef::new(Uuid::new_v4(), "plot"),
            action,
            parameters,
            ExecutionMode::Manual,
        );
        store.insert_operation(&op).await.unwrap();
        op
    }

    #[tokio::test]
    async fn create_task_rejects_automatic_operations() {
        let (orchestrator, store) = setup().await;
        let op = OperationLog::new(
            Uuid::new_v4(),
            UnitRef::new(Uuid::new_v4(), "plot"),
            "water",
            json!({}),
            ExecutionMode::Automatic,
        );
        store.insert_operation(&op).await.unwrap();

        let err = orchestrator.create_task(op.id, "water", None).await.unwrap_err();
        assert!(matches!(err, CoreError::ExecutionModeMismatch { .. }));
    }

    #[tokio::test]
    async fn second_task_for_the_same_operation_is_refused() {
        let (orchestrator, store) = setup().await;
        let op = manual_op(&store, "harvest", json!({})).await;
        let first = orchestrator.create_task(op.id, "harvest", None).await.unwrap();

        let err = orchestrator.create_task(op.id, "again", None).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTask { task_id, .. } if task_id == first.id));
    }

    #[tokio::test]
    async fn create_task_for_missing_operation_is_not_found() {
        let (orchestrator, _) = setup().await;
        let err = orchestrator
            .create_task(Uuid::new_v4(), "ghost", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "operation", .. }));
    }

    #[tokio::test]
    async fn fail_new_task_by_anyone() {
        let (orchestrator, store) = setup().await;
        let op = manual_op(&store, "harvest", json!({})).await;
        let task = orchestrator.create_task(op.id, "harvest", None).await.unwrap();

        let failed = orchestrator.fail_task(task.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        let op = store.get_operation(op.id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.executed_at.is_some());
    }

    #[tokio::test]
    async fn fail_in_progress_task_requires_assignee() {
        let (orchestrator, store) = setup().await;
        let op = manual_op(&store, "harvest", json!({})).await;
        let task = orchestrator.create_task(op.id, "harvest", None).await.unwrap();
        let worker = Uuid::new_v4();
        orchestrator.accept_task(task.id, worker).await.unwrap();

        let err = orchestrator.fail_task(task.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized { .. }));
        assert_eq!(orchestrator.get_task(task.id).await.unwrap().status, TaskStatus::InProgress);

        orchestrator.fail_task(task.id, worker).await.unwrap();
        let err = orchestrator.fail_task(task.id, worker).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn malformed_plant_parameters_abort_completion() {
        let (orchestrator, store) = setup().await;
        let op = manual_op(&store, "plant", json!({ "item_id": "not-a-uuid", "quantity": 3 })).await;
        let task = orchestrator.create_task(op.id, "plant", None).await.unwrap();
        let worker = Uuid::new_v4();
        orchestrator.accept_task(task.id, worker).await.unwrap();

        let err = orchestrator.complete_task(task.id, worker).await.unwrap_err();
        assert!(matches!(err, CoreError::MalformedActionParameters { .. }));

        assert_eq!(orchestrator.get_task(task.id).await.unwrap().status, TaskStatus::InProgress);
        let op_after = store.get_operation(op.id).await.unwrap().unwrap();
        assert_eq!(op_after.status, OperationStatus::InProgress);
        assert!(store.get_unit_content(&op.unit).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completing_non_plant_work_leaves_unit_content_alone() {
        let (orchestrator, store) = setup().await;
        let op = manual_op(&store, "harvest", json!({ "quantity": 4 })).await;
        let task = orchestrator.create_task(op.id, "harvest", None).await.unwrap();
        let worker = Uuid::new_v4();
        orchestrator.accept_task(task.id, worker).await.unwrap();
        orchestrator.complete_task(task.id, worker).await.unwrap();

        assert!(store.get_unit_content(&op.unit).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status() {
        let (orchestrator, store) = setup().await;
        let a = manual_op(&store, "harvest", json!({})).await;
        let b = manual_op(&store, "harvest", json!({})).await;
        let task_a = orchestrator.create_task(a.id, "a", None).await.unwrap();
        orchestrator.create_task(b.id, "b", Some(String::new())).await.unwrap();
        orchestrator.accept_task(task_a.id, Uuid::new_v4()).await.unwrap();

        assert_eq!(orchestrator.list_tasks(None).await.unwrap().len(), 2);
        let new_tasks = orchestrator.list_tasks(Some(TaskStatus::New)).await.unwrap();
        assert_eq!(new_tasks.len(), 1);
        assert_eq!(new_tasks[0].title, "b");
        assert!(new_tasks[0].description.is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn transitions_are_logged() {
        let (orchestrator, store) = setup().await;
        let op = manual_op(&store, "harvest", json!({})).await;
        let task = orchestrator.create_task(op.id, "harvest", None).await.unwrap();
        orchestrator.accept_task(task.id, Uuid::new_v4()).await.unwrap();

        assert!(logs_contain("task created"));
        assert!(logs_contain("task accepted"));
    }
}
