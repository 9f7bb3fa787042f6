use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::task::insert_task_for;
use crate::action::ActionParams;
use crate::entities::{
    operation, CatalogLookup, ExecutionMode, LeaseLookup, OperationLog, OperationStatus,
    SqliteStore, TaskRecord, UnitRef,
};
use crate::error::CoreError;
use crate::queue::{ActionMessage, Publisher};

/// A user's request to act on a unit.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub unit: UnitRef,
    pub action_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Task title for manual actions. Derived from the action when absent.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Result of a submission. `task` is set for manual actions.
#[derive(Debug, Clone)]
pub struct Submission {
    pub operation: OperationLog,
    pub task: Option<TaskRecord>,
}

/// Records requested actions and routes them to a human task or to the
/// action queue, according to the execution mode of the action.
pub struct ActionService<L, C, P> {
    store: SqliteStore,
    leases: L,
    catalog: C,
    publisher: P,
    timeout: Duration,
}

impl<L, C, P> ActionService<L, C, P>
where
    L: LeaseLookup,
    C: CatalogLookup,
    P: Publisher,
{
    pub fn new(store: SqliteStore, leases: L, catalog: C, publisher: P, timeout: Duration) -> Self {
        Self {
            store,
            leases,
            catalog,
            publisher,
            timeout,
        }
    }

    pub async fn submit(&self, user_id: Uuid, request: ActionRequest) -> Result<Submission, CoreError> {
        let params = ActionParams::decode(&request.action_type, &request.parameters)?;

        if let ActionParams::Plant(plant) = &params {
            if !self
                .bounded(self.leases.has_active_lease(user_id, &request.unit))
                .await?
            {
                return Err(CoreError::NoActiveLease {
                    user_id,
                    unit_id: request.unit.unit_id,
                });
            }
            if self.bounded(self.catalog.item_by_id(plant.item_id)).await?.is_none() {
                return Err(CoreError::not_found("catalog_item", plant.item_id));
            }
        }

        let mode = params.execution_mode();
        let op = OperationLog::new(
            user_id,
            request.unit,
            params.action_type(),
            params.to_value(),
            mode,
        );

        let submission = match mode {
            ExecutionMode::Manual => {
                let title = request
                    .title
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| default_title(&op));
                let task = self.create_with_task(&op, &title, request.description).await?;
                Submission {
                    operation: op,
                    task: Some(task),
                }
            }
            ExecutionMode::Automatic => {
                self.create_and_publish(&op).await?;
                Submission {
                    operation: op,
                    task: None,
                }
            }
        };

        info!(
            operation_id = %submission.operation.id,
            user_id = %user_id,
            action = %submission.operation.action_type,
            mode = %mode,
            "action submitted"
        );
        Ok(submission)
    }

    /// Operation and task commit together or not at all.
    async fn create_with_task(
        &self,
        op: &OperationLog,
        title: &str,
        description: Option<String>,
    ) -> Result<TaskRecord, CoreError> {
        self.bounded(async {
            let mut tx = self.store.begin_write().await?;
            operation::insert(&mut *tx, op).await?;
            let task = insert_task_for(&mut tx, op.id, title, description).await?;
            tx.commit().await?;
            Ok(task)
        })
        .await
    }

    /// The operation is stored as `pending` before the message goes out, so
    /// the consumer always finds it. A failed publish leaves it `failed`.
    async fn create_and_publish(&self, op: &OperationLog) -> Result<(), CoreError> {
        self.bounded(operation::insert(self.store.pool(), op)).await?;

        if let Err(e) = self.publisher.publish(&ActionMessage::new(op.id)).await {
            warn!(operation_id = %op.id, error = %e, "failed to publish action; marking operation failed");
            if let Err(mark) = self
                .bounded(operation::set_status(
                    self.store.pool(),
                    op.id,
                    OperationStatus::Failed,
                    Utc::now(),
                ))
                .await
            {
                warn!(operation_id = %op.id, error = %mark, "failed to mark unpublished operation failed");
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn get_operation(&self, id: Uuid) -> Result<OperationLog, CoreError> {
        self.bounded(operation::fetch_required(self.store.pool(), id))
            .await
    }

    /// Newest first.
    pub async fn list_for_unit(&self, unit: &UnitRef) -> Result<Vec<OperationLog>, CoreError> {
        self.bounded(operation::list_for_unit(self.store.pool(), unit))
            .await
    }

    /// Administrative purge of an operation and its task.
    pub async fn cancel(&self, id: Uuid) -> Result<(), CoreError> {
        if !self.bounded(operation::delete(self.store.pool(), id)).await? {
            return Err(CoreError::not_found("operation", id));
        }
        info!(operation_id = %id, "operation purged");
        Ok(())
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CoreError::StorageTimeout(self.timeout))?
    }
}

fn default_title(op: &OperationLog) -> String {
    format!(
        "{} {} {}",
        op.action_type, op.unit.unit_type, op.unit.unit_id
    )
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::entities::{CatalogItem, LeaseRecord, OperationLogStore, TaskStatus};
    use crate::queue::{Delivery, MemoryQueue, QueueError};

    type Service<P> = ActionService<SqliteStore, SqliteStore, P>;

    struct BrokenPublisher;

    impl Publisher for BrokenPublisher {
        async fn publish(&self, _message: &ActionMessage) -> Result<(), QueueError> {
            Err(QueueError::Transport("connection refused".into()))
        }
    }

    /// Leasing lookup whose backend never answers.
    struct StalledLeases;

    impl LeaseLookup for StalledLeases {
        async fn leases_for_user(&self, _user_id: Uuid) -> Result<Vec<LeaseRecord>, CoreError> {
            std::future::pending().await
        }
    }

    async fn service<P: Publisher>(publisher: P) -> (Service<P>, SqliteStore) {
        let store = SqliteStore::in_memory().await.unwrap();
        let service = ActionService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            publisher,
            Duration::from_secs(5),
        );
        (service, store)
    }

    fn request(unit: &UnitRef, action: &str, parameters: serde_json::Value) -> ActionRequest {
        ActionRequest {
            unit: unit.clone(),
            action_type: action.into(),
            parameters,
            title: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn plant_creates_pending_operation_with_task() {
        let (service, store) = service(MemoryQueue::new()).await;
        let user = Uuid::new_v4();
        let unit = UnitRef::new(Uuid::new_v4(), "plot");
        let seed = CatalogItem::new("seed", "Tomato");
        store.insert_catalog_item(&seed).await.unwrap();
        store
            .insert_lease(&LeaseRecord::active(user, unit.clone(), 30))
            .await
            .unwrap();

        let submission = service
            .submit(user, request(&unit, "plant", json!({ "item_id": seed.id, "quantity": 3 })))
            .await
            .unwrap();

        let task = submission.task.expect("plant is manual");
        assert_eq!(task.status, TaskStatus::New);
        assert_eq!(task.operation_id, submission.operation.id);
        assert!(task.title.starts_with("plant plot"));
        let stored = store.get_operation(submission.operation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Pending);
        assert_eq!(stored.execution_mode, ExecutionMode::Manual);
    }

    #[tokio::test]
    async fn plant_without_lease_is_refused_and_nothing_is_stored() {
        let (service, store) = service(MemoryQueue::new()).await;
        let unit = UnitRef::new(Uuid::new_v4(), "plot");
        let seed = CatalogItem::new("seed", "Tomato");
        store.insert_catalog_item(&seed).await.unwrap();

        let err = service
            .submit(
                Uuid::new_v4(),
                request(&unit, "plant", json!({ "item_id": seed.id, "quantity": 1 })),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::NoActiveLease { .. }));
        assert!(store.list_operations_for_unit(&unit).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stalled_lease_lookup_times_out_and_stores_nothing() {
        let store = SqliteStore::in_memory().await.unwrap();
        let service = ActionService::new(
            store.clone(),
            StalledLeases,
            store.clone(),
            MemoryQueue::new(),
            Duration::from_millis(50),
        );
        let unit = UnitRef::new(Uuid::new_v4(), "plot");

        let err = service
            .submit(
                Uuid::new_v4(),
                request(&unit, "plant", json!({ "item_id": Uuid::new_v4(), "quantity": 1 })),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::StorageTimeout(_)));
        assert!(err.is_retryable());
        assert!(store.list_operations_for_unit(&unit).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn plant_of_unknown_item_is_not_found() {
        let (service, store) = service(MemoryQueue::new()).await;
        let user = Uuid::new_v4();
        let unit = UnitRef::new(Uuid::new_v4(), "plot");
        store
            .insert_lease(&LeaseRecord::active(user, unit.clone(), 30))
            .await
            .unwrap();

        let err = service
            .submit(user, request(&unit, "plant", json!({ "item_id": Uuid::new_v4(), "quantity": 1 })))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "catalog_item", .. }));
    }

    #[tokio::test]
    async fn water_is_published_for_the_consumer() {
        let queue = MemoryQueue::new();
        let mut sub = queue.subscribe();
        let (service, _) = service(queue.clone()).await;
        let unit = UnitRef::new(Uuid::new_v4(), "plot");

        let submission = service
            .submit(Uuid::new_v4(), request(&unit, "water", json!({ "volume_liters": 2.0 })))
            .await
            .unwrap();

        assert!(submission.task.is_none());
        let delivery = sub.try_next().expect("message published");
        let message = ActionMessage::decode(delivery.payload()).unwrap();
        assert_eq!(message.operation_id, submission.operation.id);
    }

    #[tokio::test]
    async fn publish_failure_marks_operation_failed() {
        let (service, store) = service(BrokenPublisher).await;
        let unit = UnitRef::new(Uuid::new_v4(), "plot");

        let err = service
            .submit(Uuid::new_v4(), request(&unit, "water", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let ops = store.list_operations_for_unit(&unit).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OperationStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_purges_operation_and_task() {
        let (service, store) = service(MemoryQueue::new()).await;
        let unit = UnitRef::new(Uuid::new_v4(), "plot");
        let submission = service
            .submit(Uuid::new_v4(), request(&unit, "harvest", json!({})))
            .await
            .unwrap();
        let task_id = submission.task.unwrap().id;

        service.cancel(submission.operation.id).await.unwrap();

        assert!(crate::entities::task::fetch(store.pool(), task_id).await.unwrap().is_none());
        let err = service.cancel(submission.operation.id).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn malformed_parameters_are_rejected_before_storage() {
        let (service, store) = service(MemoryQueue::new()).await;
        let unit = UnitRef::new(Uuid::new_v4(), "plot");

        let err = service
            .submit(Uuid::new_v4(), request(&unit, "harvest", json!({ "quantity": "lots" })))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedActionParameters { .. }));
        assert!(store.list_operations_for_unit(&unit).await.unwrap().is_empty());
    }
}
