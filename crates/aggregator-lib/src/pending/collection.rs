//! TTL-bound store of batches awaiting inference responses

use super::batch::{PendingBatchSummary, PredictionBatch};
use super::correlation::{BatchId, CorrelationId};
use crate::error::PredictionError;
use crate::models::InferenceResponse;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default lifetime of a pending batch
pub const DEFAULT_BATCH_TTL_SECS: i64 = 30;

/// Largest segment travel time accepted from the inference service (one day)
pub const MAX_PREDICTED_SECONDS: f64 = 86_400.0;

/// Subject an inference request for `model_id` is published on
pub fn inference_subject(prefix: &str, model_id: i64, bucket_count: u32) -> String {
    let bucket = model_id.rem_euclid(i64::from(bucket_count.max(1)));
    format!("{}.{}", prefix, bucket)
}

#[derive(Debug)]
struct PendingEntry {
    batch: Arc<PredictionBatch>,
    expire_time: DateTime<Utc>,
}

/// Result of applying an inference response
#[derive(Debug)]
pub enum ResponseOutcome {
    /// The batch still awaits other responses
    Pending { remaining: usize },
    /// The batch is complete and this caller owns its publication
    Complete(Arc<PredictionBatch>),
}

/// Batches awaiting inference, keyed by batch id
#[derive(Debug)]
pub struct PendingPredictionsCollection {
    entries: RwLock<HashMap<BatchId, PendingEntry>>,
    ttl: Duration,
}

impl Default for PendingPredictionsCollection {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_BATCH_TTL_SECS))
    }
}

impl PendingPredictionsCollection {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Park a batch until `now + ttl`, returning its expire time
    pub async fn insert(&self, batch: Arc<PredictionBatch>, now: DateTime<Utc>) -> DateTime<Utc> {
        let expire_time = now + self.ttl;
        let id = batch.id().clone();
        self.entries
            .write()
            .await
            .insert(id, PendingEntry { batch, expire_time });
        expire_time
    }

    /// Look up a live batch; an entry past its expire time counts as unknown
    pub async fn get(&self, batch_id: &BatchId, now: DateTime<Utc>) -> Result<Arc<PredictionBatch>, PredictionError> {
        let entries = self.entries.read().await;
        match entries.get(batch_id) {
            Some(entry) if now <= entry.expire_time => Ok(entry.batch.clone()),
            _ => Err(PredictionError::ExpiredOrUnknownBatch(batch_id.to_string())),
        }
    }

    pub async fn remove(&self, batch_id: &BatchId) -> Option<Arc<PredictionBatch>> {
        self.entries.write().await.remove(batch_id).map(|e| e.batch)
    }

    /// Correlate an inference response with its pending segment
    pub async fn apply_response(
        &self,
        response: &InferenceResponse,
        now: DateTime<Utc>,
    ) -> Result<ResponseOutcome, PredictionError> {
        let correlation: CorrelationId = response.request_id.parse()?;

        if let Some(message) = &response.error {
            return Err(PredictionError::InferenceFailed {
                request_id: response.request_id.clone(),
                message: message.clone(),
            });
        }
        let predicted_seconds = response.prediction.ok_or_else(|| PredictionError::InferenceFailed {
            request_id: response.request_id.clone(),
            message: "response carried neither prediction nor error".to_string(),
        })?;
        if !predicted_seconds.is_finite() || predicted_seconds.abs() > MAX_PREDICTED_SECONDS {
            return Err(PredictionError::InferenceFailed {
                request_id: response.request_id.clone(),
                message: format!("prediction {} out of range", predicted_seconds),
            });
        }

        // Lock released before touching the trip prediction
        let batch = self.get(&correlation.batch_id, now).await?;
        let remaining = batch.apply_response(&correlation, predicted_seconds)?;
        debug!(
            batch_id = %correlation.batch_id,
            trip_id = %correlation.trip_id,
            model_id = correlation.model_id,
            remaining,
            "Applied inference response"
        );

        if remaining == 0 && batch.claim_publication() {
            self.remove(&correlation.batch_id).await;
            return Ok(ResponseOutcome::Complete(batch));
        }
        Ok(ResponseOutcome::Pending { remaining })
    }

    /// Drop batches whose expire time has passed, returning (before, after)
    pub async fn sweep(&self, now: DateTime<Utc>) -> (usize, usize) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let (live, expired): (HashMap<_, _>, HashMap<_, _>) = entries
            .drain()
            .partition(|(_, entry)| entry.expire_time >= now);
        *entries = live;

        for (batch_id, entry) in &expired {
            info!(
                batch_id = %batch_id,
                pending_remaining = entry.batch.pending_remaining(),
                "Discarding expired batch"
            );
        }
        (before, entries.len())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn summaries(&self) -> Vec<PendingBatchSummary> {
        let entries = self.entries.read().await;
        let mut summaries: Vec<_> = entries
            .values()
            .map(|e| e.batch.summary(Some(e.expire_time)))
            .collect();
        summaries.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holiday::FixedHolidayCalendar;
    use crate::models::{Model, StopTimeInstance, TripDeviation, TripInstance};
    use crate::predictor::{FeatureBuilder, SegmentPredictorFactory, TripPredictor};
    use crate::transitions::ObservedTransitions;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap()
    }

    fn stop(id: &str, offset_secs: i64, distance: f64) -> StopTimeInstance {
        let at = base() + Duration::seconds(offset_secs);
        StopTimeInstance {
            stop_id: id.to_string(),
            stop_sequence: 0,
            arrival_time: offset_secs as i32,
            departure_time: offset_secs as i32,
            shape_dist_traveled: distance,
            timepoint: false,
            arrival_date_time: at,
            departure_date_time: at,
        }
    }

    fn model(id: i64, name: &str) -> Model {
        Model {
            id,
            version: 1,
            name: name.to_string(),
            trained: true,
            avg_rmse: 30.0,
            ml_rmse: 20.0,
            average_time: 0.0,
            median_time: 0.0,
            observed_stop_count: 0,
        }
    }

    /// Batch for vehicle V1 with one trip whose two stop pairs each await inference
    fn two_request_batch() -> PredictionBatch {
        let trip = Arc::new(TripInstance {
            data_set_id: 1,
            trip_id: "trip42".to_string(),
            route_id: "R1".to_string(),
            stop_time_instances: vec![stop("A", 0, 0.0), stop("B", 300, 1000.0), stop("C", 600, 2000.0)],
        });
        let models = [model(7, "A_B"), model(8, "B_C")]
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        let predictor = TripPredictor::build(trip, &models, &SegmentPredictorFactory::default(), Duration::minutes(60));
        let deviation = TripDeviation {
            data_set_id: 1,
            trip_id: "trip42".to_string(),
            route_id: "R1".to_string(),
            vehicle_id: "V1".to_string(),
            timestamp: base(),
            trip_progress: 0.0,
            delay: 0,
        };
        let features = FeatureBuilder::new(
            Arc::new(ObservedTransitions::default()),
            Arc::new(FixedHolidayCalendar::default()),
            chrono_tz::UTC,
        );

        let (prediction, inferences) = predictor.predict(&deviation, &features);
        let mut batch = PredictionBatch::new("V1", base());
        batch.add_trip(prediction, inferences);
        batch
    }

    fn response(request_id: &str, prediction: f64) -> InferenceResponse {
        InferenceResponse {
            request_id: request_id.to_string(),
            prediction: Some(prediction),
            error: None,
        }
    }

    #[test]
    fn test_inference_subject_buckets_by_model_id() {
        assert_eq!(inference_subject("inference-request", 7, 4), "inference-request.3");
        assert_eq!(inference_subject("inference-request", 7, 1), "inference-request.0");
        assert_eq!(inference_subject("inference-request", 7, 0), "inference-request.0");
    }

    #[tokio::test]
    async fn test_batch_publishes_once_after_last_response() {
        let collection = PendingPredictionsCollection::default();
        let batch = Arc::new(two_request_batch());
        assert_eq!(batch.pending_remaining(), 2);
        let ids: Vec<String> = batch.requests().iter().map(|r| r.request_id.clone()).collect();
        assert_eq!(ids[0], format!("V1_{}-trip42-7-1", base().timestamp_millis()));

        collection.insert(batch.clone(), base()).await;

        let first = collection.apply_response(&response(&ids[0], 310.0), base()).await.unwrap();
        assert!(matches!(first, ResponseOutcome::Pending { remaining: 1 }));
        assert_eq!(batch.pending_remaining(), 1);
        assert!(!batch.is_published());

        let second = collection.apply_response(&response(&ids[1], 290.0), base()).await.unwrap();
        assert!(matches!(second, ResponseOutcome::Complete(_)));
        assert_eq!(batch.pending_remaining(), 0);
        assert!(batch.is_published());
        assert!(collection.is_empty().await);

        // Replaying a response cannot publish again
        let replay = collection.apply_response(&response(&ids[1], 290.0), base()).await;
        assert!(matches!(replay, Err(PredictionError::ExpiredOrUnknownBatch(_))));
    }

    #[tokio::test]
    async fn test_response_after_expire_time_is_rejected() {
        let collection = PendingPredictionsCollection::new(Duration::seconds(30));
        let batch = Arc::new(two_request_batch());
        let request_id = batch.requests()[0].request_id.clone();
        collection.insert(batch, base()).await;

        let late = base() + Duration::seconds(31);
        let result = collection.apply_response(&response(&request_id, 300.0), late).await;
        assert!(matches!(result, Err(PredictionError::ExpiredOrUnknownBatch(_))));
        // Still physically present until swept
        assert_eq!(collection.len().await, 1);
    }

    #[tokio::test]
    async fn test_correlation_failures() {
        let collection = PendingPredictionsCollection::default();
        let batch = Arc::new(two_request_batch());
        collection.insert(batch.clone(), base()).await;

        let malformed = collection.apply_response(&response("garbage", 1.0), base()).await;
        assert!(matches!(malformed, Err(PredictionError::Correlation(_))));

        let unknown_batch = format!("V2_{}-trip42-7-1", base().timestamp_millis());
        let result = collection.apply_response(&response(&unknown_batch, 1.0), base()).await;
        assert!(matches!(result, Err(PredictionError::ExpiredOrUnknownBatch(_))));

        let unknown_model = format!("{}-trip42-99-1", batch.id());
        let result = collection.apply_response(&response(&unknown_model, 1.0), base()).await;
        assert!(matches!(result, Err(PredictionError::UnknownRequest { .. })));

        let unknown_trip = format!("{}-trip43-7-1", batch.id());
        let result = collection.apply_response(&response(&unknown_trip, 1.0), base()).await;
        assert!(matches!(result, Err(PredictionError::UnknownRequest { .. })));

        assert_eq!(batch.pending_remaining(), 2);
    }

    #[tokio::test]
    async fn test_error_payload_leaves_segment_incomplete() {
        let collection = PendingPredictionsCollection::default();
        let batch = Arc::new(two_request_batch());
        let request_id = batch.requests()[0].request_id.clone();
        collection.insert(batch.clone(), base()).await;

        let failed = InferenceResponse {
            request_id,
            prediction: None,
            error: Some("model not loaded".to_string()),
        };
        let result = collection.apply_response(&failed, base()).await;
        assert!(matches!(result, Err(PredictionError::InferenceFailed { .. })));
        assert_eq!(batch.pending_remaining(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_prediction_rejected() {
        let collection = PendingPredictionsCollection::default();
        let batch = Arc::new(two_request_batch());
        let request_id = batch.requests()[0].request_id.clone();
        collection.insert(batch.clone(), base()).await;

        for value in [1e18, -1e18, f64::NAN, f64::INFINITY, MAX_PREDICTED_SECONDS + 1.0] {
            let result = collection.apply_response(&response(&request_id, value), base()).await;
            assert!(matches!(result, Err(PredictionError::InferenceFailed { .. })));
        }
        assert_eq!(batch.pending_remaining(), 2);

        let accepted = collection
            .apply_response(&response(&request_id, MAX_PREDICTED_SECONDS), base())
            .await
            .unwrap();
        assert!(matches!(accepted, ResponseOutcome::Pending { remaining: 1 }));
    }

    #[tokio::test]
    async fn test_sweep_partitions_live_and_expired() {
        let collection = PendingPredictionsCollection::new(Duration::seconds(30));
        let early = Arc::new(two_request_batch());
        collection.insert(early, base()).await;

        let mut later = PredictionBatch::new("V2", base());
        later.add_trip(
            crate::predictor::TripPrediction::new(
                TripDeviation {
                    data_set_id: 1,
                    trip_id: "trip7".to_string(),
                    route_id: "R1".to_string(),
                    vehicle_id: "V2".to_string(),
                    timestamp: base(),
                    trip_progress: 0.0,
                    delay: 0,
                },
                Arc::new(TripInstance {
                    data_set_id: 1,
                    trip_id: "trip7".to_string(),
                    route_id: "R1".to_string(),
                    stop_time_instances: Vec::new(),
                }),
            ),
            Vec::new(),
        );
        collection.insert(Arc::new(later), base() + Duration::seconds(20)).await;

        // Expire times: +30s and +50s
        let (before, after) = collection.sweep(base() + Duration::seconds(30)).await;
        assert_eq!((before, after), (2, 2));

        let (before, after) = collection.sweep(base() + Duration::seconds(31)).await;
        assert_eq!((before, after), (2, 1));
        let remaining = collection.summaries().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].vehicle_id, "V2");
    }
}
