//! Prediction aggregation engine
//!
//! Ties the caches, the pending collection and the update builder to the
//! message bus. The listeners in [`listener`] feed it inbound messages and
//! the task in [`sweeper`] performs every expiration.

mod listener;
mod publisher;
mod sweeper;


pub use listener::{Listeners, ListenerConfig};
pub use publisher::{BusPublisher, Publisher};
pub use sweeper::{run_sweeper, SweepConfig};

use crate::bus::{publish_json, MessageBus};
use crate::error::PredictionError;
use crate::health::{components, HealthRegistry};
use crate::holiday::HolidayCalendar;
use crate::models::{InferenceResponse, ObservedTransition, TripDeviation, VehicleMonitorResults};
use crate::observability::{AggregatorMetrics, StructuredLogger};
use crate::pending::{
    inference_subject, PendingBatchSummary, PendingPredictionsCollection, PredictionBatch,
    ResponseOutcome, DEFAULT_BATCH_TTL_SECS,
};
use crate::predictor::{
    FactoryConfig, FeatureBuilder, SegmentPredictorFactory, TripPredictorCache,
    DEFAULT_MAX_PREDICTION_MINUTES, DEFAULT_TRIP_PREDICTOR_TTL_SECS,
};
use crate::registry::ModelRegistry;
use crate::schedule::TripScheduleProvider;
use crate::transitions::{ObservedTransitions, DEFAULT_MAX_AGE_SECS};
use crate::update::{TripUpdateBuilder, DEFAULT_LIMIT_EARLY_DEPARTURE_SECS};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Bus subjects the engine reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subjects {
    pub vehicle_monitor_results: String,
    /// Queue group sharing vehicle reports across aggregator instances
    pub queue_group: String,
    /// Requests go to `{prefix}.{bucket}`
    pub inference_request_prefix: String,
    pub inference_response: String,
    pub trip_updates: String,
}

impl Default for Subjects {
    fn default() -> Self {
        Self {
            vehicle_monitor_results: "vehicle-monitor-results".to_string(),
            queue_group: "prediction-aggregator".to_string(),
            inference_request_prefix: "inference-request".to_string(),
            inference_response: "inference-response".to_string(),
            trip_updates: "trip-updates".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub instance: String,
    pub batch_ttl: Duration,
    /// How long a trip predictor outlives its trip's last arrival
    pub trip_predictor_ttl: Duration,
    pub factory: FactoryConfig,
    pub limit_early_departure_secs: i64,
    pub max_prediction_minutes: i64,
    pub inference_bucket_count: u32,
    /// Routes to predict; empty means every route
    pub route_allow_list: HashSet<String>,
    pub transition_max_age: Duration,
    /// Agency timezone for time-of-day features
    pub timezone: Tz,
    pub subjects: Subjects,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance: "prediction-aggregator".to_string(),
            batch_ttl: Duration::seconds(DEFAULT_BATCH_TTL_SECS),
            trip_predictor_ttl: Duration::seconds(DEFAULT_TRIP_PREDICTOR_TTL_SECS),
            factory: FactoryConfig::default(),
            limit_early_departure_secs: DEFAULT_LIMIT_EARLY_DEPARTURE_SECS,
            max_prediction_minutes: DEFAULT_MAX_PREDICTION_MINUTES,
            inference_bucket_count: 1,
            route_allow_list: HashSet::new(),
            transition_max_age: Duration::seconds(DEFAULT_MAX_AGE_SECS),
            timezone: chrono_tz::America::Los_Angeles,
            subjects: Subjects::default(),
        }
    }
}

impl EngineConfig {
    pub fn is_route_allowed(&self, route_id: &str) -> bool {
        self.route_allow_list.is_empty() || self.route_allow_list.contains(route_id)
    }
}

/// Sizes of one store before and after a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepCounts {
    pub before: usize,
    pub after: usize,
}

impl From<(usize, usize)> for SweepCounts {
    fn from((before, after): (usize, usize)) -> Self {
        Self { before, after }
    }
}

impl SweepCounts {
    pub fn removed(&self) -> usize {
        self.before.saturating_sub(self.after)
    }
}

/// Result of one periodic sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub swept_at: DateTime<Utc>,
    pub pending_batches: SweepCounts,
    pub trip_predictors: SweepCounts,
    pub observed_transitions: SweepCounts,
    pub elapsed_ms: u64,
}

/// Snapshot served by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub instance: String,
    pub trip_predictors: usize,
    pub pending_batches: usize,
    pub observed_transitions: usize,
    pub inference_bucket_count: u32,
    pub batch_ttl_secs: i64,
    #[serde(default)]
    pub last_sweep: Option<SweepReport>,
}

/// Collaborators the engine is built from
pub struct EngineParts {
    pub schedule: Arc<dyn TripScheduleProvider>,
    pub models: Arc<dyn ModelRegistry>,
    pub holidays: Arc<dyn HolidayCalendar>,
    pub bus: Arc<dyn MessageBus>,
    pub publisher: Arc<dyn Publisher>,
}

pub struct AggregatorEngine {
    config: EngineConfig,
    transitions: Arc<ObservedTransitions>,
    cache: TripPredictorCache,
    pending: PendingPredictionsCollection,
    features: FeatureBuilder,
    builder: TripUpdateBuilder,
    bus: Arc<dyn MessageBus>,
    publisher: Arc<dyn Publisher>,
    metrics: AggregatorMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
    last_sweep: Mutex<Option<SweepReport>>,
}

impl AggregatorEngine {
    pub fn new(config: EngineConfig, parts: EngineParts) -> Self {
        let transitions = Arc::new(ObservedTransitions::new(config.transition_max_age));
        let cache = TripPredictorCache::new(
            parts.schedule,
            parts.models,
            SegmentPredictorFactory::new(config.factory.clone()),
            Duration::minutes(config.max_prediction_minutes),
        );
        let features = FeatureBuilder::new(transitions.clone(), parts.holidays, config.timezone);

        Self {
            transitions,
            cache,
            pending: PendingPredictionsCollection::new(config.batch_ttl),
            features,
            builder: TripUpdateBuilder::new(config.limit_early_departure_secs),
            bus: parts.bus,
            publisher: parts.publisher,
            metrics: AggregatorMetrics::new(),
            logger: StructuredLogger::new(config.instance.clone()),
            health: HealthRegistry::default(),
            last_sweep: Mutex::new(None),
            config,
        }
    }

    /// Report publisher health into a shared registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transitions(&self) -> &Arc<ObservedTransitions> {
        &self.transitions
    }

    pub fn pending(&self) -> &PendingPredictionsCollection {
        &self.pending
    }

    pub fn cache(&self) -> &TripPredictorCache {
        &self.cache
    }

    pub fn ingest_transitions(&self, transitions: &[ObservedTransition]) -> usize {
        for transition in transitions {
            self.transitions.record(transition.clone());
        }
        transitions.len()
    }

    /// Broadcast copy of a vehicle report: record its observed transitions
    pub fn handle_transition_message(&self, payload: &[u8]) -> Result<usize, PredictionError> {
        let results: VehicleMonitorResults = serde_json::from_slice(payload)?;
        Ok(self.ingest_transitions(&results.observed_stop_transitions))
    }

    /// Queue copy of a vehicle report: predict every reported vehicle
    pub async fn handle_vehicle_report(&self, payload: &[u8]) -> Result<Vec<Arc<PredictionBatch>>, PredictionError> {
        let results: VehicleMonitorResults = serde_json::from_slice(payload)?;
        Ok(self.handle_vehicle_results_at(results, Utc::now()).await)
    }

    /// Predict and dispatch one batch per vehicle in the report
    pub async fn handle_vehicle_results_at(
        &self,
        results: VehicleMonitorResults,
        now: DateTime<Utc>,
    ) -> Vec<Arc<PredictionBatch>> {
        let started = Instant::now();
        self.metrics.inc_reports_handled();

        let mut by_vehicle: BTreeMap<String, Vec<TripDeviation>> = BTreeMap::new();
        for deviation in results.trip_deviations {
            if !self.config.is_route_allowed(&deviation.route_id) {
                debug!(route_id = %deviation.route_id, trip_id = %deviation.trip_id, "Route not allowed");
                continue;
            }
            by_vehicle
                .entry(deviation.vehicle_id.clone())
                .or_default()
                .push(deviation);
        }

        let mut batches = Vec::with_capacity(by_vehicle.len());
        for (vehicle_id, deviations) in by_vehicle {
            let Some(batch) = self.predict_vehicle(&vehicle_id, deviations).await else {
                continue;
            };
            let batch = Arc::new(batch);
            self.dispatch_batch(batch.clone(), now).await;
            batches.push(batch);
        }

        self.metrics
            .observe_prediction_latency(started.elapsed().as_secs_f64());
        batches
    }

    /// Build one vehicle's batch, trips in service order
    pub async fn predict_vehicle(&self, vehicle_id: &str, deviations: Vec<TripDeviation>) -> Option<PredictionBatch> {
        let mut predictors = Vec::with_capacity(deviations.len());
        for deviation in deviations {
            match self.cache.get_or_build(&deviation).await {
                Ok(predictor) => predictors.push((predictor, deviation)),
                Err(e) => {
                    self.metrics.inc_dropped(e.kind());
                    warn!(
                        vehicle_id = %vehicle_id,
                        trip_id = %deviation.trip_id,
                        error = %e,
                        "Skipping deviation"
                    );
                }
            }
        }

        predictors.sort_by_key(|(predictor, _)| predictor.trip().first_departure());
        let mut seen = HashSet::new();
        predictors.retain(|(_, deviation)| seen.insert(deviation.trip_id.clone()));

        let created_at = predictors.iter().map(|(_, d)| d.timestamp).max()?;
        let mut batch = PredictionBatch::new(vehicle_id, created_at);
        for (predictor, deviation) in predictors {
            if !predictor.within_prediction_range(&deviation) {
                debug!(trip_id = %deviation.trip_id, "Trip beyond prediction horizon");
                continue;
            }
            let (prediction, inferences) = predictor.predict(&deviation, &self.features);
            batch.add_trip(prediction, inferences);
        }

        if batch.is_empty() {
            return None;
        }
        self.metrics.add_trip_predictions(batch.trip_predictions().len());
        Some(batch)
    }

    /// Publish a resolved batch now, or park it and fan out its inference requests
    pub async fn dispatch_batch(&self, batch: Arc<PredictionBatch>, now: DateTime<Utc>) {
        if batch.pending_remaining() == 0 {
            if batch.claim_publication() {
                self.publish_batch(&batch).await;
            }
            return;
        }

        // Parked before any request leaves so no response can miss it
        let expire_time = self.pending.insert(batch.clone(), now).await;
        self.metrics.set_pending_batches(self.pending.len().await);
        debug!(
            batch_id = %batch.id(),
            requests = batch.requests().len(),
            expire_time = %expire_time,
            "Parked batch awaiting inference"
        );

        let subjects = &self.config.subjects;
        for request in batch.requests() {
            let subject = inference_subject(
                &subjects.inference_request_prefix,
                request.ml_model_id,
                self.config.inference_bucket_count,
            );
            if let Err(e) = publish_json(self.bus.as_ref(), &subject, request).await {
                warn!(request_id = %request.request_id, subject = %subject, error = %e, "Failed to send inference request");
            }
        }
        self.metrics.add_inference_requests(batch.requests().len());
    }

    /// Build and hand off the batch's trip updates; returns how many were delivered
    pub async fn publish_batch(&self, batch: &PredictionBatch) -> usize {
        let updates = self.builder.build_batch(batch);
        let mut failed = 0;
        for update in &updates {
            match self.publisher.publish(update).await {
                Ok(()) => self.metrics.inc_trip_updates_published(),
                Err(e) => {
                    failed += 1;
                    self.metrics.inc_publish_failures();
                    warn!(trip_id = %update.trip_id, error = %e, "Failed to publish trip update");
                }
            }
        }
        if failed > 0 {
            self.health
                .set_degraded(
                    components::PUBLISHER,
                    format!("{} of {} trip updates failed to publish", failed, updates.len()),
                )
                .await;
        } else if !updates.is_empty() {
            self.health.set_healthy(components::PUBLISHER).await;
        }
        self.metrics.inc_batches_published();
        self.logger
            .log_batch_published(batch.id().as_str(), batch.vehicle_id(), updates.len(), failed);
        updates.len() - failed
    }

    pub async fn handle_inference_message(&self, payload: &[u8]) -> Result<ResponseOutcome, PredictionError> {
        let response: InferenceResponse = serde_json::from_slice(payload)?;
        self.handle_inference_response_at(&response, Utc::now()).await
    }

    /// Apply one inference response, publishing its batch if that completed it
    pub async fn handle_inference_response_at(
        &self,
        response: &InferenceResponse,
        now: DateTime<Utc>,
    ) -> Result<ResponseOutcome, PredictionError> {
        let outcome = self.pending.apply_response(response, now).await?;
        self.metrics.inc_responses_applied();
        if let ResponseOutcome::Complete(batch) = &outcome {
            self.metrics.set_pending_batches(self.pending.len().await);
            self.publish_batch(batch).await;
        }
        Ok(outcome)
    }

    /// Record a dropped message for logs and metrics
    pub fn record_drop(&self, subject: &str, error: &PredictionError) {
        self.metrics.inc_dropped(error.kind());
        self.logger.log_dropped(subject, error.kind(), error);
    }

    /// Expire pending batches, trip predictors and observed transitions
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let started = Instant::now();
        let pending_batches = SweepCounts::from(self.pending.sweep(now).await);
        let trip_predictors = SweepCounts::from(self.cache.sweep(now, self.config.trip_predictor_ttl).await);
        let observed_transitions = SweepCounts::from(self.transitions.sweep(now));

        if pending_batches.removed() > 0 {
            self.metrics.add_batches_expired(pending_batches.removed());
            self.logger
                .log_batches_expired(pending_batches.removed(), pending_batches.after);
        }
        self.metrics.set_pending_batches(pending_batches.after);
        self.metrics
            .set_cache_entries("trip_predictors", trip_predictors.after);
        self.metrics
            .set_cache_entries("observed_transitions", observed_transitions.after);

        let report = SweepReport {
            swept_at: now,
            pending_batches,
            trip_predictors,
            observed_transitions,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            pending_batches = report.pending_batches.after,
            trip_predictors = report.trip_predictors.after,
            observed_transitions = report.observed_transitions.after,
            elapsed_ms = report.elapsed_ms,
            "Sweep complete"
        );
        *self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        report
    }

    pub async fn status(&self) -> EngineStatus {
        let last_sweep = self
            .last_sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        EngineStatus {
            instance: self.config.instance.clone(),
            trip_predictors: self.cache.len().await,
            pending_batches: self.pending.len().await,
            observed_transitions: self.transitions.len(),
            inference_bucket_count: self.config.inference_bucket_count,
            batch_ttl_secs: self.config.batch_ttl.num_seconds(),
            last_sweep,
        }
    }

    pub async fn pending_summaries(&self) -> Vec<PendingBatchSummary> {
        self.pending.summaries().await
    }
}
