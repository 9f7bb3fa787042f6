//! Queue consumer: drives automatic operations from the action queue.
//!
//! Messages are handled one at a time. A delivery is acknowledged only once
//! the operation's terminal status is stored; any transient failure before
//! that requeues it. Status writes set fixed values, so a redelivery after a
//! partial failure converges on the same final state.

pub mod executor;

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entities::{ExecutionMode, OperationLogStore, OperationStatus};
use crate::error::CoreError;
use crate::queue::{ActionMessage, Delivery, QueueError, Subscription};

pub use executor::{ActionExecutor, SimulatedExecutor};

const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Requeued,
    Dropped,
}

pub struct QueueConsumer<S, E> {
    store: S,
    executor: E,
    shutdown: watch::Receiver<bool>,
    storage_timeout: Duration,
}

impl<S, E> QueueConsumer<S, E>
where
    S: OperationLogStore,
    E: ActionExecutor,
{
    /// `shutdown` flips to `true` when the consumer should stop. Work in
    /// progress at that moment is abandoned and its message requeued.
    pub fn new(store: S, executor: E, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            executor,
            shutdown,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Process deliveries until shutdown or until the subscription ends.
    pub async fn run<Sub: Subscription>(&self, mut subscription: Sub) {
        let mut shutdown = self.shutdown.clone();
        info!("queue consumer started");

        loop {
            let next = tokio::select! {
                biased;
                Ok(()) = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => break,
                next = subscription.next_delivery() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    let outcome = self.handle(delivery).await;
                    debug!(?outcome, "delivery settled");
                }
                Ok(None) => {
                    info!("subscription ended");
                    break;
                }
                Err(QueueError::Closed) => break,
                Err(e) => {
                    warn!(error = %e, "failed to receive delivery; retrying");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
            }
        }

        info!("queue consumer stopped");
    }

    /// Handle one delivery and settle it.
    pub async fn handle<D: Delivery>(&self, delivery: D) -> Outcome {
        let delivery_count = delivery.delivery_count();
        let message = match ActionMessage::decode(delivery.payload()) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    payload = %String::from_utf8_lossy(delivery.payload()),
                    delivery_count,
                    error = %e,
                    "dropping undecodable delivery"
                );
                return settle(delivery, Outcome::Dropped).await;
            }
        };
        let operation_id = message.operation_id;

        let op = match self.storage(self.store.get_operation(operation_id)).await {
            Ok(Some(op)) => op,
            Ok(None) => {
                error!(operation_id = %operation_id, "operation not found; dropping delivery");
                return settle(delivery, Outcome::Dropped).await;
            }
            Err(e) => return self.storage_failure(delivery, operation_id, e).await,
        };

        if op.execution_mode != ExecutionMode::Automatic {
            let e = CoreError::ExecutionModeMismatch {
                operation_id,
                mode: op.execution_mode.to_string(),
                path: "queue consumer",
            };
            error!(operation_id = %operation_id, error = %e, "dropping delivery");
            return settle(delivery, Outcome::Dropped).await;
        }

        match op.status {
            OperationStatus::Completed => {
                info!(operation_id = %operation_id, delivery_count, "operation already completed; acknowledging redelivery");
                return settle(delivery, Outcome::Acked).await;
            }
            OperationStatus::Failed => {
                warn!(operation_id = %operation_id, delivery_count, "operation already failed; dropping delivery");
                return settle(delivery, Outcome::Dropped).await;
            }
            OperationStatus::Pending | OperationStatus::InProgress => {}
        }

        if let Err(e) = self.set_status(operation_id, OperationStatus::InProgress).await {
            return self.storage_failure(delivery, operation_id, e).await;
        }

        let result = match op.params() {
            Ok(params) => {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    result = self.executor.execute(&op, &params) => result,
                    Ok(()) = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => {
                        warn!(operation_id = %operation_id, "shutdown during execution; requeueing");
                        return settle(delivery, Outcome::Requeued).await;
                    }
                }
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if e.is_retryable() {
                warn!(operation_id = %operation_id, delivery_count, error = %e, "action failed; requeueing");
                return settle(delivery, Outcome::Requeued).await;
            }
            error!(operation_id = %operation_id, error = %e, "action failed permanently");
            if let Err(e) = self.set_status(operation_id, OperationStatus::Failed).await {
                return self.storage_failure(delivery, operation_id, e).await;
            }
            return settle(delivery, Outcome::Acked).await;
        }

        if let Err(e) = self.set_status(operation_id, OperationStatus::Completed).await {
            return self.storage_failure(delivery, operation_id, e).await;
        }
        info!(operation_id = %operation_id, delivery_count, "operation completed");
        settle(delivery, Outcome::Acked).await
    }

    async fn set_status(&self, id: Uuid, status: OperationStatus) -> Result<(), CoreError> {
        self.storage(self.store.update_operation_status(id, status))
            .await
    }

    async fn storage<T>(&self, fut: impl Future<Output = Result<T, CoreError>>) -> Result<T, CoreError> {
        tokio::time::timeout(self.storage_timeout, fut)
            .await
            .map_err(|_| CoreError::StorageTimeout(self.storage_timeout))?
    }

    async fn storage_failure<D: Delivery>(&self, delivery: D, operation_id: Uuid, e: CoreError) -> Outcome {
        if e.is_retryable() {
            warn!(operation_id = %operation_id, error = %e, "storage failure; requeueing");
            settle(delivery, Outcome::Requeued).await
        } else {
            error!(operation_id = %operation_id, error = %e, "permanent failure; dropping delivery");
            settle(delivery, Outcome::Dropped).await
        }
    }
}

async fn settle<D: Delivery>(delivery: D, outcome: Outcome) -> Outcome {
    let result = match outcome {
        Outcome::Acked => delivery.ack().await,
        Outcome::Requeued => delivery.requeue().await,
        Outcome::Dropped => delivery.reject().await,
    };
    // An unsettled delivery comes back later; the status checks above make
    // that harmless.
    if let Err(e) = result {
        warn!(?outcome, error = %e, "failed to settle delivery");
    }
    outcome
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::entities::{OperationLog, SqliteStore, UnitRef};
    use crate::queue::{MemoryQueue, Publisher};

    fn consumer(
        store: SqliteStore,
    ) -> (QueueConsumer<SqliteStore, SimulatedExecutor>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let consumer = QueueConsumer::new(store, SimulatedExecutor::new(Duration::ZERO), rx);
        (consumer, tx)
    }

    async fn automatic_op(store: &SqliteStore) -> OperationLog {
        let op = OperationLog::new(
            Uuid::new_v4(),
            UnitRef::new(Uuid::new_v4(), "plot"),
            "water",
            json!({}),
            ExecutionMode::Automatic,
        );
        store.insert_operation(&op).await.unwrap();
        op
    }

    #[tokio::test]
    #[traced_test]
    async fn undecodable_payload_is_dropped_and_logged() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (consumer, _tx) = consumer(store);
        let queue = MemoryQueue::new();
        let mut sub = queue.subscribe();
        queue.publish_raw(&b"{not json"[..]).unwrap();

        let outcome = consumer.handle(sub.try_next().unwrap()).await;

        assert_eq!(outcome, Outcome::Dropped);
        assert_eq!(queue.stats().rejected(), 1);
        assert!(queue.is_empty());
        assert!(logs_contain("dropping undecodable delivery"));
        assert!(logs_contain("{not json"));
    }

    #[tokio::test]
    async fn completed_redelivery_is_acked_without_rework() {
        let store = SqliteStore::in_memory().await.unwrap();
        let op = automatic_op(&store).await;
        store
            .update_operation_status(op.id, OperationStatus::Completed)
            .await
            .unwrap();
        let executed_at = store.get_operation(op.id).await.unwrap().unwrap().executed_at;
        let (consumer, _tx) = consumer(store.clone());
        let queue = MemoryQueue::new();
        let mut sub = queue.subscribe();
        queue.publish(&ActionMessage::new(op.id)).await.unwrap();

        assert_eq!(consumer.handle(sub.try_next().unwrap()).await, Outcome::Acked);
        let after = store.get_operation(op.id).await.unwrap().unwrap();
        assert_eq!(after.status, OperationStatus::Completed);
        assert_eq!(after.executed_at, executed_at);
    }

    #[tokio::test]
    async fn manual_operation_is_refused() {
        let store = SqliteStore::in_memory().await.unwrap();
        let op = OperationLog::new(
            Uuid::new_v4(),
            UnitRef::new(Uuid::new_v4(), "plot"),
            "harvest",
            json!({}),
            ExecutionMode::Manual,
        );
        store.insert_operation(&op).await.unwrap();
        let (consumer, _tx) = consumer(store.clone());
        let queue = MemoryQueue::new();
        let mut sub = queue.subscribe();
        queue.publish(&ActionMessage::new(op.id)).await.unwrap();

        assert_eq!(consumer.handle(sub.try_next().unwrap()).await, Outcome::Dropped);
        let after = store.get_operation(op.id).await.unwrap().unwrap();
        assert_eq!(after.status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_operation_is_dropped() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (consumer, _tx) = consumer(store);
        let queue = MemoryQueue::new();
        let mut sub = queue.subscribe();
        queue.publish(&ActionMessage::new(Uuid::new_v4())).await.unwrap();

        assert_eq!(consumer.handle(sub.try_next().unwrap()).await, Outcome::Dropped);
    }

    #[tokio::test]
    async fn run_drains_queue_until_shutdown() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = automatic_op(&store).await;
        let second = automatic_op(&store).await;
        let (consumer, shutdown) = consumer(store.clone());
        let queue = MemoryQueue::new();
        queue.publish(&ActionMessage::new(first.id)).await.unwrap();
        queue.publish(&ActionMessage::new(second.id)).await.unwrap();

        let sub = queue.subscribe();
        let handle = tokio::spawn(async move { consumer.run(sub).await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while queue.stats().acked() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "consumer did not drain the queue");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.send(true).unwrap();
        handle.await.unwrap();

        for id in [first.id, second.id] {
            let op = store.get_operation(id).await.unwrap().unwrap();
            assert_eq!(op.status, OperationStatus::Completed);
        }
    }

    #[tokio::test]
    async fn shutdown_during_work_requeues() {
        let store = SqliteStore::in_memory().await.unwrap();
        let op = automatic_op(&store).await;
        let (tx, rx) = watch::channel(false);
        let consumer = QueueConsumer::new(
            store.clone(),
            SimulatedExecutor::new(Duration::from_secs(60)),
            rx,
        );
        let queue = MemoryQueue::new();
        let mut sub = queue.subscribe();
        queue.publish(&ActionMessage::new(op.id)).await.unwrap();
        let delivery = sub.try_next().unwrap();

        let handle = tokio::spawn(async move { consumer.handle(delivery).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), Outcome::Requeued);
        assert_eq!(queue.len(), 1);
        let after = store.get_operation(op.id).await.unwrap().unwrap();
        assert_eq!(after.status, OperationStatus::InProgress);
    }
}
