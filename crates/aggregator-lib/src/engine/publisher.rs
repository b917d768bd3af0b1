use crate::bus::{publish_json, BusError, MessageBus};
use crate::update::TripUpdate;
use async_trait::async_trait;
use std::sync::Arc;

/// Downstream sink for finished trip updates
///
/// Delivery is at most once; failures are reported, never retried.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, update: &TripUpdate) -> Result<(), BusError>;
}

/// Publishes each trip update as JSON on one subject
pub struct BusPublisher {
    bus: Arc<dyn MessageBus>,
    subject: String,
}

impl BusPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, subject: impl Into<String>) -> Self {
        Self {
            bus,
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[async_trait]
impl Publisher for BusPublisher {
    async fn publish(&self, update: &TripUpdate) -> Result<(), BusError> {
        publish_json(self.bus.as_ref(), &self.subject, update).await
    }
}
