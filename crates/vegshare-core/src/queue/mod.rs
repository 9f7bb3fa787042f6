//! Action queue abstraction.
//!
//! Delivery is at-least-once. Every delivery must be settled exactly once
//! with [`Delivery::ack`], [`Delivery::requeue`] or [`Delivery::reject`];
//! the settle methods take `self` so a delivery cannot be settled twice.

pub mod memory;
pub mod nats;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::CoreError;

pub use memory::{MemoryQueue, QueueStats};
pub use nats::NatsQueue;

/// Default subject (NATS) / channel name for action messages.
pub const DEFAULT_SUBJECT: &str = "actions";

const REDELIVERY_BASE_DELAY: Duration = Duration::from_secs(1);
const REDELIVERY_MAX_DELAY: Duration = Duration::from_secs(30);

/// How long a requeued message waits before it is delivered again:
/// 1s after the first delivery, doubling up to 30s.
pub fn redelivery_delay(delivery_count: u64) -> Duration {
    let exponent = delivery_count.saturating_sub(1).min(16) as u32;
    REDELIVERY_BASE_DELAY
        .saturating_mul(1 << exponent)
        .min(REDELIVERY_MAX_DELAY)
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),

    #[error("queue closed")]
    Closed,

    #[error("failed to encode queue message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Payload of every action message: just enough to find the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMessage {
    pub operation_id: Uuid,
}

impl ActionMessage {
    pub fn new(operation_id: Uuid) -> Self {
        Self { operation_id }
    }

    pub fn encode(&self) -> Result<Bytes, QueueError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// A payload that does not decode can never succeed on redelivery.
    pub fn decode(payload: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(payload).map_err(|e| CoreError::DeliveryPoisoned(e.to_string()))
    }
}

pub trait Publisher: Send + Sync + 'static {
    fn publish(
        &self,
        message: &ActionMessage,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;
}

pub trait Delivery: Send {
    fn payload(&self) -> &[u8];

    /// 1 on first delivery, incremented on every redelivery.
    fn delivery_count(&self) -> u64;

    /// Remove the message from the queue.
    fn ack(self) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Negative-acknowledge and make the message available again after
    /// [`redelivery_delay`].
    fn requeue(self) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Negative-acknowledge without redelivery.
    fn reject(self) -> impl Future<Output = Result<(), QueueError>> + Send;
}

pub trait Subscription: Send {
    type Delivery: Delivery;

    /// Wait for the next delivery. `Ok(None)` means the subscription ended.
    fn next_delivery(
        &mut self,
    ) -> impl Future<Output = Result<Option<Self::Delivery>, QueueError>> + Send;
}
