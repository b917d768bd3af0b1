use super::AggregatorEngine;
use crate::health::{components, HealthRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Target time between sweep starts (default: 10 seconds)
    pub interval: Duration,
    /// A sweep slower than this marks the sweeper degraded
    pub slow_threshold: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            slow_threshold: Duration::from_secs(2),
        }
    }
}

/// Sweep on a fixed cadence until shutdown
///
/// Sleeps for whatever is left of the interval after each sweep, so a slow
/// sweep shortens the next wait instead of shifting every later one.
pub async fn run_sweeper(
    engine: Arc<AggregatorEngine>,
    config: SweepConfig,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(interval_secs = config.interval.as_secs(), "Starting sweeper");

    loop {
        let started = Instant::now();
        engine.sweep(Utc::now()).await;
        let elapsed = started.elapsed();

        if elapsed > config.slow_threshold {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "Slow sweep");
            health
                .set_degraded(components::SWEEPER, format!("sweep took {}ms", elapsed.as_millis()))
                .await;
        } else {
            health.set_healthy(components::SWEEPER).await;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.interval.saturating_sub(elapsed)) => {}
            _ = shutdown.recv() => {
                info!("Shutting down sweeper");
                break;
            }
        }
    }
}
