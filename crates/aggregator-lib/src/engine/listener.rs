use super::{AggregatorEngine, Subjects};
use crate::bus::{BusError, BusMessage, MessageBus, Subscription, DEFAULT_SUBSCRIPTION_BUFFER};
use crate::health::{components, HealthRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Buffer of each bus subscription
    pub buffer: usize,
    /// How long shutdown waits for in-flight vehicle reports
    pub drain_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// The three inbound subscriptions, established before any listener starts
pub struct Listeners {
    transitions: Subscription,
    deviations: Subscription,
    responses: Subscription,
    config: ListenerConfig,
}

impl Listeners {
    /// Subscribe to every inbound subject; any failure here is fatal to the caller
    pub async fn subscribe(
        bus: &dyn MessageBus,
        subjects: &Subjects,
        config: ListenerConfig,
    ) -> Result<Self, BusError> {
        let transitions = bus
            .subscribe(&subjects.vehicle_monitor_results, config.buffer)
            .await?;
        let deviations = bus
            .queue_subscribe(
                &subjects.vehicle_monitor_results,
                &subjects.queue_group,
                config.buffer,
            )
            .await?;
        let responses = bus
            .subscribe(&subjects.inference_response, config.buffer)
            .await?;

        info!(
            vehicle_monitor_results = %subjects.vehicle_monitor_results,
            queue_group = %subjects.queue_group,
            inference_response = %subjects.inference_response,
            "Subscribed to inbound subjects"
        );
        Ok(Self {
            transitions,
            deviations,
            responses,
            config,
        })
    }

    /// Start one task per subscription
    pub fn spawn(
        self,
        engine: Arc<AggregatorEngine>,
        health: HealthRegistry,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(run_transition_listener(
                self.transitions,
                engine.clone(),
                health.clone(),
                shutdown.subscribe(),
            )),
            tokio::spawn(run_deviation_listener(
                self.deviations,
                engine.clone(),
                health.clone(),
                self.config.drain_timeout,
                shutdown.subscribe(),
            )),
            tokio::spawn(run_inference_listener(
                self.responses,
                engine,
                health,
                shutdown.subscribe(),
            )),
        ]
    }
}

async fn closed(health: &HealthRegistry, component: &str) {
    warn!(component, "Subscription closed");
    health.set_unhealthy(component, "subscription closed").await;
}

async fn run_transition_listener(
    mut subscription: Subscription,
    engine: Arc<AggregatorEngine>,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(subject = %subscription.subject(), "Starting transition listener");
    loop {
        tokio::select! {
            message = subscription.next() => {
                let Some(message) = message else {
                    closed(&health, components::TRANSITION_LISTENER).await;
                    break;
                };
                match engine.handle_transition_message(&message.payload) {
                    Ok(count) => debug!(transitions = count, "Recorded observed transitions"),
                    Err(e) => engine.record_drop(&message.subject, &e),
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down transition listener");
                break;
            }
        }
    }
}

/// Each report runs on its own task so slow predictions never stall the subscription
async fn run_deviation_listener(
    mut subscription: Subscription,
    engine: Arc<AggregatorEngine>,
    health: HealthRegistry,
    drain_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(subject = %subscription.subject(), "Starting deviation listener");
    let mut workers = JoinSet::new();

    loop {
        tokio::select! {
            message = subscription.next() => {
                let Some(message) = message else {
                    closed(&health, components::DEVIATION_LISTENER).await;
                    break;
                };
                workers.spawn(predict_report(engine.clone(), message));
                while let Some(result) = workers.try_join_next() {
                    if let Err(e) = result {
                        warn!(error = %e, "Vehicle report worker failed");
                    }
                }
            }
            _ = shutdown.recv() => {
                info!(in_flight = workers.len(), "Shutting down deviation listener");
                break;
            }
        }
    }

    let drained = tokio::time::timeout(drain_timeout, async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(abandoned = workers.len(), "Timed out draining vehicle report workers");
        workers.abort_all();
    }
}

async fn predict_report(engine: Arc<AggregatorEngine>, message: BusMessage) {
    match engine.handle_vehicle_report(&message.payload).await {
        Ok(batches) => debug!(batches = batches.len(), "Handled vehicle report"),
        Err(e) => engine.record_drop(&message.subject, &e),
    }
}

async fn run_inference_listener(
    mut subscription: Subscription,
    engine: Arc<AggregatorEngine>,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(subject = %subscription.subject(), "Starting inference listener");
    loop {
        tokio::select! {
            message = subscription.next() => {
                let Some(message) = message else {
                    closed(&health, components::INFERENCE_LISTENER).await;
                    break;
                };
                if let Err(e) = engine.handle_inference_message(&message.payload).await {
                    engine.record_drop(&message.subject, &e);
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down inference listener");
                break;
            }
        }
    }
}
