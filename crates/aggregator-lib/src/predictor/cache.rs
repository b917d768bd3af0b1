//! Trip predictor cache with trip-lifecycle expiry

use super::factory::SegmentPredictorFactory;
use super::trip::TripPredictor;
use crate::error::PredictionError;
use crate::models::TripDeviation;
use crate::registry::ModelRegistry;
use crate::schedule::TripScheduleProvider;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default time a predictor outlives its trip's last arrival (30 minutes)
pub const DEFAULT_TRIP_PREDICTOR_TTL_SECS: i64 = 30 * 60;

type CacheKey = (i64, String);

/// Trip predictors keyed by (data set, trip id)
pub struct TripPredictorCache {
    entries: RwLock<HashMap<CacheKey, Arc<TripPredictor>>>,
    provider: Arc<dyn TripScheduleProvider>,
    registry: Arc<dyn ModelRegistry>,
    factory: SegmentPredictorFactory,
    horizon: Duration,
}

impl TripPredictorCache {
    pub fn new(
        provider: Arc<dyn TripScheduleProvider>,
        registry: Arc<dyn ModelRegistry>,
        factory: SegmentPredictorFactory,
        horizon: Duration,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            provider,
            registry,
            factory,
            horizon,
        }
    }

    /// Return the cached predictor for the deviation's trip, building it on a miss
    pub async fn get_or_build(&self, deviation: &TripDeviation) -> Result<Arc<TripPredictor>, PredictionError> {
        let key = (deviation.data_set_id, deviation.trip_id.clone());
        if let Some(predictor) = self.entries.read().await.get(&key) {
            return Ok(predictor.clone());
        }

        // Fetch outside the lock; a concurrent builder for the same trip may win the insert
        let trip = self
            .provider
            .trip_instance(deviation.data_set_id, &deviation.trip_id, deviation.timestamp)
            .await?;
        let models = self.registry.current_models();
        let built = Arc::new(TripPredictor::build(trip, &models, &self.factory, self.horizon));

        let mut entries = self.entries.write().await;
        let predictor = entries.entry(key).or_insert(built).clone();
        debug!(
            data_set_id = deviation.data_set_id,
            trip_id = %deviation.trip_id,
            cached = entries.len(),
            "Cached trip predictor"
        );
        Ok(predictor)
    }

    /// Drop predictors whose trip ended more than `ttl` before `now`, returning (before, after)
    pub async fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> (usize, usize) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, predictor| match predictor.last_arrival() {
            Some(last_arrival) => now - last_arrival <= ttl,
            None => false,
        });
        let after = entries.len();
        if before != after {
            info!(before, after, "Swept trip predictor cache");
        }
        (before, after)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
