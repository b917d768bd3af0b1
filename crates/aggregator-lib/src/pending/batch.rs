//! Trip predictions derived from one vehicle report

use super::correlation::{BatchId, CorrelationId};
use crate::error::PredictionError;
use crate::models::InferenceRequest;
use crate::predictor::{InferenceKey, PendingInference, TripPrediction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One vehicle's trip predictions plus the inference requests they await
#[derive(Debug)]
pub struct PredictionBatch {
    id: BatchId,
    vehicle_id: String,
    created_at: DateTime<Utc>,
    trips: Vec<Arc<TripPrediction>>,
    requests: Vec<InferenceRequest>,
    published: AtomicBool,
}

impl PredictionBatch {
    pub fn new(vehicle_id: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: BatchId::new(vehicle_id, created_at),
            vehicle_id: vehicle_id.to_string(),
            created_at,
            trips: Vec::new(),
            requests: Vec::new(),
            published: AtomicBool::new(false),
        }
    }

    /// Add a trip prediction in service order, turning its inference work into requests
    pub fn add_trip(&mut self, prediction: TripPrediction, inferences: Vec<PendingInference>) {
        for inference in inferences {
            let correlation = CorrelationId::new(
                self.id.clone(),
                prediction.trip_id(),
                inference.model_id,
                inference.model_version,
            );
            self.requests.push(InferenceRequest {
                request_id: correlation.to_string(),
                ml_model_id: inference.model_id,
                version: inference.model_version,
                features: inference.features,
                timestamp: self.created_at,
            });
        }
        self.trips.push(Arc::new(prediction));
    }

    pub fn id(&self) -> &BatchId {
        &self.id
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn trip_predictions(&self) -> &[Arc<TripPrediction>] {
        &self.trips
    }

    pub fn requests(&self) -> &[InferenceRequest] {
        &self.requests
    }

    pub fn contains_trip(&self, trip_id: &str) -> bool {
        self.trips.iter().any(|t| t.trip_id() == trip_id)
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    /// Inference requests still awaited across every trip in the batch
    pub fn pending_remaining(&self) -> usize {
        self.trips.iter().map(|t| t.pending_requests()).sum()
    }

    /// Apply a response to the matching trip, returning requests still pending batch-wide
    pub fn apply_response(&self, correlation: &CorrelationId, predicted_seconds: f64) -> Result<usize, PredictionError> {
        let unknown = || PredictionError::UnknownRequest {
            batch_id: self.id.to_string(),
            trip_id: correlation.trip_id.clone(),
            model_id: correlation.model_id,
            version: correlation.model_version,
        };
        let trip = self
            .trips
            .iter()
            .find(|t| t.trip_id() == correlation.trip_id)
            .ok_or_else(unknown)?;

        let key = InferenceKey {
            model_id: correlation.model_id,
            model_version: correlation.model_version,
        };
        trip.apply_inference(self.id.as_str(), key, predicted_seconds)?;
        Ok(self.pending_remaining())
    }

    /// Claim the right to publish; true for exactly one caller
    pub fn claim_publication(&self) -> bool {
        self.published
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    pub fn summary(&self, expire_time: Option<DateTime<Utc>>) -> PendingBatchSummary {
        PendingBatchSummary {
            batch_id: self.id.to_string(),
            vehicle_id: self.vehicle_id.clone(),
            created_at: self.created_at,
            expire_time,
            trips: self.trips.iter().map(|t| t.trip_id().to_string()).collect(),
            requests: self.requests.len(),
            pending_remaining: self.pending_remaining(),
        }
    }
}

/// Serializable view of a pending batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBatchSummary {
    pub batch_id: String,
    pub vehicle_id: String,
    pub created_at: DateTime<Utc>,
    pub expire_time: Option<DateTime<Utc>>,
    pub trips: Vec<String>,
    pub requests: usize,
    pub pending_remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TripDeviation, TripInstance};
    use chrono::TimeZone;

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap()
    }

    fn schedule_only_trip(trip_id: &str) -> TripPrediction {
        TripPrediction::new(
            TripDeviation {
                data_set_id: 1,
                trip_id: trip_id.to_string(),
                route_id: "R1".to_string(),
                vehicle_id: "V1".to_string(),
                timestamp: created(),
                trip_progress: 0.0,
                delay: 0,
            },
            Arc::new(TripInstance {
                data_set_id: 1,
                trip_id: trip_id.to_string(),
                route_id: "R1".to_string(),
                stop_time_instances: Vec::new(),
            }),
        )
    }

    #[test]
    fn test_batch_id_from_vehicle_and_time() {
        let batch = PredictionBatch::new("V1", created());
        assert_eq!(batch.id().as_str(), "V1_1700000000000");
        assert!(batch.is_empty());
        assert_eq!(batch.pending_remaining(), 0);
    }

    #[test]
    fn test_publication_claimed_once() {
        let batch = PredictionBatch::new("V1", created());
        assert!(!batch.is_published());
        assert!(batch.claim_publication());
        assert!(!batch.claim_publication());
        assert!(batch.is_published());
    }

    #[test]
    fn test_trips_keep_insertion_order() {
        let mut batch = PredictionBatch::new("V1", created());
        batch.add_trip(schedule_only_trip("t2"), Vec::new());
        batch.add_trip(schedule_only_trip("t1"), Vec::new());

        assert!(batch.contains_trip("t1"));
        assert!(!batch.contains_trip("t3"));
        let summary = batch.summary(None);
        assert_eq!(summary.trips, vec!["t2", "t1"]);
        assert_eq!(summary.requests, 0);
        assert_eq!(summary.pending_remaining, 0);
    }

    #[test]
    fn test_response_for_unknown_trip_is_rejected() {
        let mut batch = PredictionBatch::new("V1", created());
        batch.add_trip(schedule_only_trip("t1"), Vec::new());
        let correlation = CorrelationId::new(batch.id().clone(), "t9", 7, 1);

        let result = batch.apply_response(&correlation, 120.0);
        assert!(matches!(result, Err(PredictionError::UnknownRequest { .. })));
    }
}
