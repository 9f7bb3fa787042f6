//! In-process queue on `flume` channels.
//!
//! Used by tests and by single-process deployments where the server runs
//! the consumer inline. Nothing survives a restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use super::{ActionMessage, Delivery, Publisher, QueueError, Subscription, redelivery_delay};

#[derive(Debug)]
struct Envelope {
    payload: Bytes,
    delivery_count: u64,
    /// Set on requeue; the message is not handed out before then.
    not_before: Option<Instant>,
}

/// Settlement counters, for inspection in tests and logs.
#[derive(Debug, Default)]
pub struct QueueStats {
    published: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    rejected: AtomicU64,
}

impl QueueStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct MemoryQueue {
    tx: flume::Sender<Envelope>,
    rx: flume::Receiver<Envelope>,
    stats: Arc<QueueStats>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Enqueue arbitrary bytes, bypassing [`ActionMessage`] encoding.
    pub fn publish_raw(&self, payload: impl Into<Bytes>) -> Result<(), QueueError> {
        self.tx
            .send(Envelope {
                payload: payload.into(),
                delivery_count: 1,
                not_before: None,
            })
            .map_err(|_| QueueError::Closed)?;
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// A consumer handle. Several subscriptions compete for messages.
    pub fn subscribe(&self) -> MemorySubscription {
        MemorySubscription {
            rx: self.rx.clone(),
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
            held: None,
        }
    }

    /// Messages waiting for delivery.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

impl Publisher for MemoryQueue {
    async fn publish(&self, message: &ActionMessage) -> Result<(), QueueError> {
        self.publish_raw(message.encode()?)
    }
}

pub struct MemorySubscription {
    rx: flume::Receiver<Envelope>,
    tx: flume::Sender<Envelope>,
    stats: Arc<QueueStats>,
    /// A received message still waiting out its redelivery delay. Kept here
    /// so a cancelled `next_delivery` does not lose it.
    held: Option<Envelope>,
}

impl MemorySubscription {
    /// Non-blocking variant of [`Subscription::next_delivery`]. Ignores
    /// redelivery delays.
    pub fn try_next(&mut self) -> Option<MemoryDelivery> {
        let envelope = self.held.take().or_else(|| self.rx.try_recv().ok())?;
        Some(self.wrap(envelope))
    }

    fn wrap(&self, envelope: Envelope) -> MemoryDelivery {
        MemoryDelivery {
            envelope,
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl Subscription for MemorySubscription {
    type Delivery = MemoryDelivery;

    async fn next_delivery(&mut self) -> Result<Option<MemoryDelivery>, QueueError> {
        if self.held.is_none() {
            match self.rx.recv_async().await {
                Ok(envelope) => self.held = Some(envelope),
                Err(flume::RecvError::Disconnected) => return Ok(None),
            }
        }
        if let Some(due) = self.held.as_ref().and_then(|envelope| envelope.not_before) {
            tokio::time::sleep_until(due).await;
        }
        Ok(self.held.take().map(|envelope| self.wrap(envelope)))
    }
}

pub struct MemoryDelivery {
    envelope: Envelope,
    tx: flume::Sender<Envelope>,
    stats: Arc<QueueStats>,
}

impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.envelope.payload
    }

    fn delivery_count(&self) -> u64 {
        self.envelope.delivery_count
    }

    async fn ack(self) -> Result<(), QueueError> {
        self.stats.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn requeue(self) -> Result<(), QueueError> {
        let delay = redelivery_delay(self.envelope.delivery_count);
        let delivery_count = self.envelope.delivery_count + 1;
        debug!(delivery_count, delay_ms = delay.as_millis() as u64, "requeueing in-memory message");
        self.tx
            .send(Envelope {
                payload: self.envelope.payload,
                delivery_count,
                not_before: Some(Instant::now() + delay),
            })
            .map_err(|_| QueueError::Closed)?;
        self.stats.requeued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn reject(self) -> Result<(), QueueError> {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
