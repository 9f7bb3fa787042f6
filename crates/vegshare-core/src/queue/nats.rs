//! NATS JetStream transport.
//!
//! Messages land in a file-backed stream; consumers are durable pull
//! consumers with explicit acks, so an unsettled message is redelivered
//! after the ack wait expires.

use std::time::Duration;

use async_nats::jetstream::{self, AckKind, consumer::PullConsumer, stream::Stream};
use futures::StreamExt;
use tracing::info;

use super::{ActionMessage, Delivery, Publisher, QueueError, Subscription, redelivery_delay};

pub const STREAM_NAME: &str = "VEGSHARE_ACTIONS";

/// How long JetStream waits for a settle before redelivering.
const ACK_WAIT: Duration = Duration::from_secs(60);

fn transport(e: impl std::fmt::Display) -> QueueError {
    QueueError::Transport(e.to_string())
}

#[derive(Clone)]
pub struct NatsQueue {
    jetstream: jetstream::Context,
    stream: Stream,
    subject: String,
}

impl NatsQueue {
    /// Connect and make sure the action stream exists.
    pub async fn connect(url: &str, subject: &str) -> Result<Self, QueueError> {
        let client = async_nats::connect(url).await.map_err(transport)?;
        let jetstream = jetstream::new(client);

        let stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![subject.to_string()],
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(transport)?;

        info!(url, subject, stream = STREAM_NAME, "connected to NATS JetStream");
        Ok(Self {
            jetstream,
            stream,
            subject: subject.to_string(),
        })
    }

    /// Bind a durable pull consumer. Instances sharing `durable_name` share
    /// one cursor. At most one message is in flight per consumer, which
    /// keeps processing sequential.
    pub async fn subscribe(&self, durable_name: &str) -> Result<NatsSubscription, QueueError> {
        let consumer: PullConsumer = self
            .stream
            .get_or_create_consumer(
                durable_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(durable_name.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: ACK_WAIT,
                    filter_subject: self.subject.clone(),
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(transport)?;
        let messages = consumer.messages().await.map_err(transport)?;

        info!(durable_name, subject = %self.subject, "bound JetStream consumer");
        Ok(NatsSubscription { messages })
    }
}

impl Publisher for NatsQueue {
    async fn publish(&self, message: &ActionMessage) -> Result<(), QueueError> {
        // First await sends, second waits for the stream to persist it.
        self.jetstream
            .publish(self.subject.clone(), message.encode()?)
            .await
            .map_err(transport)?
            .await
            .map_err(transport)?;
        Ok(())
    }
}

pub struct NatsSubscription {
    messages: jetstream::consumer::pull::Stream,
}

impl Subscription for NatsSubscription {
    type Delivery = NatsDelivery;

    async fn next_delivery(&mut self) -> Result<Option<NatsDelivery>, QueueError> {
        match self.messages.next().await {
            Some(Ok(message)) => Ok(Some(NatsDelivery { message })),
            Some(Err(e)) => Err(transport(e)),
            None => Ok(None),
        }
    }
}

pub struct NatsDelivery {
    message: jetstream::Message,
}

impl Delivery for NatsDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn delivery_count(&self) -> u64 {
        self.message
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1)
    }

    async fn ack(self) -> Result<(), QueueError> {
        self.message.ack().await.map_err(transport)
    }

    async fn requeue(self) -> Result<(), QueueError> {
        let delay = redelivery_delay(self.delivery_count());
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(transport)
    }

    async fn reject(self) -> Result<(), QueueError> {
        self.message.ack_with(AckKind::Term).await.map_err(transport)
    }
}
