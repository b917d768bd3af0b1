use super::{BusError, BusMessage, MessageBus, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct QueueGroup {
    members: Vec<mpsc::Sender<BusMessage>>,
    next: usize,
}

#[derive(Debug, Default)]
struct Routes {
    subscribers: HashMap<String, Vec<mpsc::Sender<BusMessage>>>,
    groups: HashMap<String, HashMap<String, QueueGroup>>,
}

/// In-process bus with bounded subscriber buffers
///
/// Publishing never waits: a message for a full subscriber is dropped and
/// logged. Queue groups hand messages to their members round-robin.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    routes: Mutex<Routes>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live subscribers on `subject`, queue group members included
    pub fn subscriber_count(&self, subject: &str) -> usize {
        let routes = self.routes();
        let plain = routes
            .subscribers
            .get(subject)
            .map(|s| s.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0);
        let grouped = routes
            .groups
            .get(subject)
            .map(|groups| {
                groups
                    .values()
                    .map(|g| g.members.iter().filter(|tx| !tx.is_closed()).count())
                    .sum::<usize>()
            })
            .unwrap_or(0);
        plain + grouped
    }
}

fn validate(subject: &str) -> Result<(), BusError> {
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return Err(BusError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

/// Deliver without waiting; returns false when the receiver is gone
fn deliver(tx: &mpsc::Sender<BusMessage>, message: &BusMessage) -> bool {
    match tx.try_send(message.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(subject = %message.subject, "Subscriber buffer full, dropping message");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        validate(subject)?;
        let message = BusMessage::new(subject, payload);
        let mut routes = self.routes();

        if let Some(subscribers) = routes.subscribers.get_mut(subject) {
            subscribers.retain(|tx| deliver(tx, &message));
        }

        if let Some(groups) = routes.groups.get_mut(subject) {
            for group in groups.values_mut() {
                group.members.retain(|tx| !tx.is_closed());
                if group.members.is_empty() {
                    continue;
                }
                let index = group.next % group.members.len();
                group.next = index + 1;
                deliver(&group.members[index], &message);
            }
        }

        debug!(subject, bytes = message.payload.len(), "Published message");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, buffer: usize) -> Result<Subscription, BusError> {
        validate(subject)?;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.routes()
            .subscribers
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(subject.to_string(), rx))
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
        buffer: usize,
    ) -> Result<Subscription, BusError> {
        validate(subject)?;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.routes()
            .groups
            .entry(subject.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default()
            .members
            .push(tx);
        Ok(Subscription::new(subject.to_string(), rx))
    }
}
