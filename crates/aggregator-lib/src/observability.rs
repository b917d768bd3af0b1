//! Prometheus metrics and event-tagged structured logs

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Prediction latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

static GLOBAL_METRICS: OnceLock<AggregatorMetricsInner> = OnceLock::new();

struct AggregatorMetricsInner {
    reports_handled: IntCounter,
    trip_predictions: IntCounter,
    batches_published: IntCounter,
    batches_expired: IntCounter,
    inference_requests: IntCounter,
    responses_applied: IntCounter,
    messages_dropped: IntCounterVec,
    trip_updates_published: IntCounter,
    publish_failures: IntCounter,
    pending_batches: IntGauge,
    cache_entries: IntGaugeVec,
    prediction_latency_seconds: Histogram,
}

impl AggregatorMetricsInner {
    fn new() -> Self {
        Self {
            reports_handled: register_int_counter!(
                "prediction_aggregator_reports_handled_total",
                "Vehicle monitor reports predicted"
            )
            .expect("Failed to register reports_handled"),

            trip_predictions: register_int_counter!(
                "prediction_aggregator_trip_predictions_total",
                "Trip predictions built from deviations"
            )
            .expect("Failed to register trip_predictions"),

            batches_published: register_int_counter!(
                "prediction_aggregator_batches_published_total",
                "Prediction batches turned into trip updates"
            )
            .expect("Failed to register batches_published"),

            batches_expired: register_int_counter!(
                "prediction_aggregator_batches_expired_total",
                "Pending batches discarded by the sweep"
            )
            .expect("Failed to register batches_expired"),

            inference_requests: register_int_counter!(
                "prediction_aggregator_inference_requests_total",
                "Inference requests dispatched"
            )
            .expect("Failed to register inference_requests"),

            responses_applied: register_int_counter!(
                "prediction_aggregator_inference_responses_applied_total",
                "Inference responses applied to pending segments"
            )
            .expect("Failed to register responses_applied"),

            messages_dropped: register_int_counter_vec!(
                "prediction_aggregator_messages_dropped_total",
                "Inbound messages dropped, by reason",
                &["reason"]
            )
            .expect("Failed to register messages_dropped"),

            trip_updates_published: register_int_counter!(
                "prediction_aggregator_trip_updates_published_total",
                "Trip updates handed to the publisher"
            )
            .expect("Failed to register trip_updates_published"),

            publish_failures: register_int_counter!(
                "prediction_aggregator_publish_failures_total",
                "Trip updates the publisher failed to deliver"
            )
            .expect("Failed to register publish_failures"),

            pending_batches: register_int_gauge!(
                "prediction_aggregator_pending_batches",
                "Batches awaiting inference responses"
            )
            .expect("Failed to register pending_batches"),

            cache_entries: register_int_gauge_vec!(
                "prediction_aggregator_cache_entries",
                "Entries held per cache",
                &["cache"]
            )
            .expect("Failed to register cache_entries"),

            prediction_latency_seconds: register_histogram!(
                "prediction_aggregator_prediction_latency_seconds",
                "Time from receiving a vehicle report to dispatching its batch",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),
        }
    }
}

/// Handle to the process-wide aggregator metrics; clones share one registry entry
#[derive(Clone)]
pub struct AggregatorMetrics {
    _private: (),
}

impl Default for AggregatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AggregatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AggregatorMetricsInner {
        GLOBAL_METRICS.get_or_init(AggregatorMetricsInner::new)
    }

    pub fn inc_reports_handled(&self) {
        self.inner().reports_handled.inc();
    }

    pub fn add_trip_predictions(&self, count: usize) {
        self.inner().trip_predictions.inc_by(count as u64);
    }

    pub fn inc_batches_published(&self) {
        self.inner().batches_published.inc();
    }

    pub fn add_batches_expired(&self, count: usize) {
        self.inner().batches_expired.inc_by(count as u64);
    }

    pub fn add_inference_requests(&self, count: usize) {
        self.inner().inference_requests.inc_by(count as u64);
    }

    pub fn inc_responses_applied(&self) {
        self.inner().responses_applied.inc();
    }

    /// Count a dropped inbound message under a short reason label
    pub fn inc_dropped(&self, reason: &str) {
        self.inner().messages_dropped.with_label_values(&[reason]).inc();
    }

    pub fn inc_trip_updates_published(&self) {
        self.inner().trip_updates_published.inc();
    }

    pub fn inc_publish_failures(&self) {
        self.inner().publish_failures.inc();
    }

    pub fn set_pending_batches(&self, count: usize) {
        self.inner().pending_batches.set(count as i64);
    }

    pub fn set_cache_entries(&self, cache: &str, count: usize) {
        self.inner()
            .cache_entries
            .with_label_values(&[cache])
            .set(count as i64);
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }
}

/// Event-tagged logs for significant aggregator events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, models: usize, trips: usize) {
        info!(
            event = "aggregator_started",
            instance = %self.instance,
            version = %version,
            models = models,
            trips = trips,
            "Prediction aggregator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "aggregator_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Prediction aggregator shutting down"
        );
    }

    pub fn log_batch_published(&self, batch_id: &str, vehicle_id: &str, trips: usize, failed: usize) {
        if failed == 0 {
            info!(
                event = "batch_published",
                instance = %self.instance,
                batch_id = %batch_id,
                vehicle_id = %vehicle_id,
                trips = trips,
                "Published trip updates"
            );
        } else {
            warn!(
                event = "batch_published",
                instance = %self.instance,
                batch_id = %batch_id,
                vehicle_id = %vehicle_id,
                trips = trips,
                failed = failed,
                "Published trip updates with failures"
            );
        }
    }

    pub fn log_batches_expired(&self, expired: usize, remaining: usize) {
        info!(
            event = "batches_expired",
            instance = %self.instance,
            expired = expired,
            remaining = remaining,
            "Discarded expired prediction batches"
        );
    }

    /// A message that could not be matched or decoded
    pub fn log_dropped(&self, subject: &str, kind: &str, error: &dyn std::fmt::Display) {
        warn!(
            event = "message_dropped",
            instance = %self.instance,
            subject = %subject,
            kind = %kind,
            error = %error,
            "Dropped inbound message"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let first = AggregatorMetrics::new();
        let second = AggregatorMetrics::default();

        first.inc_reports_handled();
        second.add_inference_requests(3);
        first.inc_dropped("correlation");
        second.set_cache_entries("trip_predictors", 4);
        first.observe_prediction_latency(0.004);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "prediction_aggregator_messages_dropped_total"));
    }

    #[test]
    fn test_structured_logger_instance() {
        let logger = StructuredLogger::new("aggregator-0");
        assert_eq!(logger.instance, "aggregator-0");
    }
}
