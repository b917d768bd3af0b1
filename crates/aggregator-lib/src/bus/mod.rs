//! Message bus abstraction
//!
//! Subjects are plain strings. A plain subscription receives every message
//! published on its subject; members of a queue group share the subject's
//! messages so each one reaches exactly one member.

mod memory;

pub use memory::InMemoryBus;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Default per-subscriber buffer
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,

    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),

    #[error("failed to encode message for {subject}: {source}")]
    Encode {
        subject: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One message as delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }
}

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    receiver: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub(crate) fn new(subject: String, receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self { subject, receiver }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the bus is gone
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    /// Next message if one is already buffered
    pub fn try_next(&mut self) -> Option<BusMessage> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<BusMessage> {
        ReceiverStream::new(self.receiver)
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload; delivery is at most once
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Receive every message on `subject`
    async fn subscribe(&self, subject: &str, buffer: usize) -> Result<Subscription, BusError>;

    /// Share messages on `subject` with the other members of `group`
    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
        buffer: usize,
    ) -> Result<Subscription, BusError>;
}

/// Serialize `value` as JSON and publish it
pub async fn publish_json<T: serde::Serialize + ?Sized>(
    bus: &dyn MessageBus,
    subject: &str,
    value: &T,
) -> Result<(), BusError> {
    let payload = serde_json::to_vec(value).map_err(|source| BusError::Encode {
        subject: subject.to_string(),
        source,
    })?;
    bus.publish(subject, payload).await
}
