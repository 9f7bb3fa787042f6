use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;
use vegshare_core::CoreError;
use vegshare_core::action::ActionParams;
use vegshare_core::entities::{
    ExecutionMode, OperationLog, OperationLogStore, OperationStatus, SqliteStore, UnitRef,
};
use vegshare_core::queue::{ActionMessage, Delivery, MemoryQueue, Publisher};
use vegshare_core::worker::{ActionExecutor, Outcome, QueueConsumer, SimulatedExecutor};

/// Operation store that fails selected status writes a set number of times
/// before letting them through.
struct FlakyStore {
    inner: SqliteStore,
    failures: Mutex<HashMap<OperationStatus, u32>>,
}

impl FlakyStore {
    fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn fail_next(&self, status: OperationStatus, times: u32) {
        self.failures.lock().unwrap().insert(status, times);
    }

    fn should_fail(&self, status: OperationStatus) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&status) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

impl OperationLogStore for FlakyStore {
    async fn insert_operation(&self, operation: &OperationLog) -> Result<(), CoreError> {
        self.inner.insert_operation(operation).await
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<OperationLog>, CoreError> {
        self.inner.get_operation(id).await
    }

    async fn update_operation_status(&self, id: Uuid, status: OperationStatus) -> Result<(), CoreError> {
        if self.should_fail(status) {
            return Err(CoreError::StorageUnavailable(sqlx::Error::PoolTimedOut));
        }
        self.inner.update_operation_status(id, status).await
    }

    async fn list_operations_for_unit(&self, unit: &UnitRef) -> Result<Vec<OperationLog>, CoreError> {
        self.inner.list_operations_for_unit(unit).await
    }

    async fn purge_operation(&self, id: Uuid) -> Result<bool, CoreError> {
        self.inner.purge_operation(id).await
    }
}

/// Executor that fails with a fixed error.
struct FailingExecutor {
    retryable: bool,
}

impl ActionExecutor for FailingExecutor {
    async fn execute(&self, _operation: &OperationLog, _params: &ActionParams) -> Result<(), CoreError> {
        Err(CoreError::ExecutionFailed {
            reason: "pump offline".into(),
            retryable: self.retryable,
        })
    }
}

async fn water_op(store: &SqliteStore) -> OperationLog {
    let op = OperationLog::new(
        Uuid::new_v4(),
        UnitRef::new(Uuid::new_v4(), "plot"),
        "water",
        json!({ "volume_liters": 5.0 }),
        ExecutionMode::Automatic,
    );
    store.insert_operation(&op).await.unwrap();
    op
}

#[tokio::test]
async fn outage_on_completion_requeues_then_converges() {
    let sqlite = SqliteStore::in_memory().await.unwrap();
    let op2 = water_op(&sqlite).await;
    let store = FlakyStore::new(sqlite.clone());
    store.fail_next(OperationStatus::Completed, 1);
    let (_shutdown, rx) = watch::channel(false);
    let consumer = QueueConsumer::new(store, SimulatedExecutor::new(Duration::ZERO), rx);

    let queue = MemoryQueue::new();
    let mut sub = queue.subscribe();
    queue.publish(&ActionMessage::new(op2.id)).await.unwrap();

    assert_eq!(consumer.handle(sub.try_next().unwrap()).await, Outcome::Requeued);
    let midway = sqlite.get_operation(op2.id).await.unwrap().unwrap();
    assert_eq!(midway.status, OperationStatus::InProgress);
    assert_eq!(queue.len(), 1);

    let redelivery = sub.try_next().unwrap();
    assert_eq!(redelivery.delivery_count(), 2);
    assert_eq!(consumer.handle(redelivery).await, Outcome::Acked);

    let done = sqlite.get_operation(op2.id).await.unwrap().unwrap();
    assert_eq!(done.status, OperationStatus::Completed);
    assert!(done.executed_at.is_some());
    assert!(queue.is_empty());
    assert_eq!(queue.stats().acked(), 1);
    assert_eq!(queue.stats().requeued(), 1);
}

#[tokio::test]
async fn outage_on_start_requeues_without_touching_the_operation() {
    let sqlite = SqliteStore::in_memory().await.unwrap();
    let op = water_op(&sqlite).await;
    let store = FlakyStore::new(sqlite.clone());
    store.fail_next(OperationStatus::InProgress, 1);
    let (_shutdown, rx) = watch::channel(false);
    let consumer = QueueConsumer::new(store, SimulatedExecutor::new(Duration::ZERO), rx);

    let queue = MemoryQueue::new();
    let mut sub = queue.subscribe();
    queue.publish(&ActionMessage::new(op.id)).await.unwrap();

    assert_eq!(consumer.handle(sub.try_next().unwrap()).await, Outcome::Requeued);
    let untouched = sqlite.get_operation(op.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, OperationStatus::Pending);

    assert_eq!(consumer.handle(sub.try_next().unwrap()).await, Outcome::Acked);
    let done = sqlite.get_operation(op.id).await.unwrap().unwrap();
    assert_eq!(done.status, OperationStatus::Completed);
}

#[tokio::test]
async fn retryable_execution_failure_requeues() {
    let sqlite = SqliteStore::in_memory().await.unwrap();
    let op = water_op(&sqlite).await;
    let (_shutdown, rx) = watch::channel(false);
    let consumer = QueueConsumer::new(sqlite.clone(), FailingExecutor { retryable: true }, rx);

    let queue = MemoryQueue::new();
    let mut sub = queue.subscribe();
    queue.publish(&ActionMessage::new(op.id)).await.unwrap();

    assert_eq!(consumer.handle(sub.try_next().unwrap()).await, Outcome::Requeued);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn permanent_execution_failure_fails_the_operation_and_acks() {
    let sqlite = SqliteStore::in_memory().await.unwrap();
    let op = water_op(&sqlite).await;
    let (_shutdown, rx) = watch::channel(false);
    let consumer = QueueConsumer::new(sqlite.clone(), FailingExecutor { retryable: false }, rx);

    let queue = MemoryQueue::new();
    let mut sub = queue.subscribe();
    queue.publish(&ActionMessage::new(op.id)).await.unwrap();

    assert_eq!(consumer.handle(sub.try_next().unwrap()).await, Outcome::Acked);
    let failed = sqlite.get_operation(op.id).await.unwrap().unwrap();
    assert_eq!(failed.status, OperationStatus::Failed);

    // A stale redelivery of a failed operation is discarded.
    queue.publish(&ActionMessage::new(op.id)).await.unwrap();
    assert_eq!(consumer.handle(sub.try_next().unwrap()).await, Outcome::Dropped);
}
