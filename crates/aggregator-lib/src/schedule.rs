//! Trip schedule provider
//!
//! The schedule database is an external collaborator. The aggregator only
//! needs a dated [`TripInstance`] for a data set, trip id and effective time.

use crate::error::PredictionError;
use crate::models::TripInstance;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Source of dated trip schedules
#[async_trait]
pub trait TripScheduleProvider: Send + Sync {
    /// Fetch the trip instance in effect at `at`
    async fn trip_instance(
        &self,
        data_set_id: i64,
        trip_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Arc<TripInstance>, PredictionError>;
}

/// In-memory provider over a snapshot of dated trips
#[derive(Debug, Default)]
pub struct StaticScheduleProvider {
    trips: RwLock<HashMap<(i64, String), Arc<TripInstance>>>,
}

impl StaticScheduleProvider {
    pub fn new(trips: impl IntoIterator<Item = TripInstance>) -> Self {
        let provider = Self::default();
        for trip in trips {
            provider.insert(trip);
        }
        provider
    }

    /// Load a JSON array of trip instances
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schedule snapshot {:?}", path))?;
        let trips: Vec<TripInstance> =
            serde_json::from_str(&content).context("Failed to parse schedule snapshot")?;
        info!(path = ?path, trips = trips.len(), "Loaded schedule snapshot");
        Ok(Self::new(trips))
    }

    pub fn insert(&self, trip: TripInstance) {
        let key = (trip.data_set_id, trip.trip_id.clone());
        self.trips
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(trip));
    }

    pub fn len(&self) -> usize {
        self.trips.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TripScheduleProvider for StaticScheduleProvider {
    async fn trip_instance(
        &self,
        data_set_id: i64,
        trip_id: &str,
        _at: DateTime<Utc>,
    ) -> Result<Arc<TripInstance>, PredictionError> {
        self.trips
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(data_set_id, trip_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                PredictionError::Schedule(format!("trip {} not found in data set {}", trip_id, data_set_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn trip(trip_id: &str) -> TripInstance {
        TripInstance {
            data_set_id: 1,
            trip_id: trip_id.to_string(),
            route_id: "R1".to_string(),
            stop_time_instances: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_lookup_by_data_set_and_trip() {
        let provider = StaticScheduleProvider::new([trip("t1")]);
        let now = Utc::now();

        assert!(provider.trip_instance(1, "t1", now).await.is_ok());
        let missing = provider.trip_instance(2, "t1", now).await;
        assert!(matches!(missing, Err(PredictionError::Schedule(_))));
    }

    #[test]
    fn test_load_from_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&vec![trip("t1"), trip("t2")]).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let provider = StaticScheduleProvider::from_json_file(file.path()).unwrap();
        assert_eq!(provider.len(), 2);
    }
}
