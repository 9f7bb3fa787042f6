//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use vegshare_core::entities::SqliteStore;
use vegshare_core::queue::{ActionMessage, MemoryQueue, NatsQueue, Publisher, QueueError};
use vegshare_core::services::{ActionService, TaskOrchestrator};

use crate::config::Config;

/// The action queue the server publishes to, chosen at startup.
#[derive(Clone)]
pub enum QueueBackend {
    Memory(MemoryQueue),
    Nats(NatsQueue),
}

impl Publisher for QueueBackend {
    async fn publish(&self, message: &ActionMessage) -> Result<(), QueueError> {
        match self {
            QueueBackend::Memory(queue) => queue.publish(message).await,
            QueueBackend::Nats(queue) => queue.publish(message).await,
        }
    }
}

pub type Actions = ActionService<SqliteStore, SqliteStore, QueueBackend>;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    pub store: SqliteStore,
    pub orchestrator: TaskOrchestrator,
    pub actions: Arc<Actions>,
}

impl AppState {
    pub fn new(config: Config, store: SqliteStore, queue: QueueBackend) -> Self {
        let timeout = config.storage_timeout();
        Self {
            orchestrator: TaskOrchestrator::new(store.clone(), timeout),
            actions: Arc::new(ActionService::new(
                store.clone(),
                store.clone(),
                store.clone(),
                queue,
                timeout,
            )),
            config: Arc::new(config),
            store,
        }
    }
}
