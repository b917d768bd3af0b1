//! Most recent observed travel time between adjacent stops
//!
//! Observations are upserted last-write-wins per (from, to) stop pair and
//! expire lazily: a lookup that finds an entry older than the configured
//! maximum age deletes it and reports nothing.

use crate::models::ObservedTransition;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Default maximum age of an observation (30 minutes)
pub const DEFAULT_MAX_AGE_SECS: i64 = 30 * 60;

type TransitionKey = (String, String);

/// Keyed store of observed stop-to-stop transitions
#[derive(Debug)]
pub struct ObservedTransitions {
    entries: DashMap<TransitionKey, ObservedTransition>,
    max_age: Duration,
}

impl Default for ObservedTransitions {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_MAX_AGE_SECS))
    }
}

impl ObservedTransitions {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_age,
        }
    }

    /// Record an observation, replacing any previous one for the same pair
    pub fn record(&self, observation: ObservedTransition) {
        let key = (
            observation.from_stop_id.clone(),
            observation.to_stop_id.clone(),
        );
        self.entries.insert(key, observation);
    }

    /// Look up the latest observation for a stop pair as of `at`
    pub fn lookup(&self, from_stop_id: &str, to_stop_id: &str, at: DateTime<Utc>) -> Option<ObservedTransition> {
        let key = (from_stop_id.to_string(), to_stop_id.to_string());

        let expired = self
            .entries
            .remove_if(&key, |_, obs| at - obs.observed_time > self.max_age);
        if let Some((_, obs)) = expired {
            debug!(
                from_stop_id = %obs.from_stop_id,
                to_stop_id = %obs.to_stop_id,
                age_secs = (at - obs.observed_time).num_seconds(),
                "Discarded expired transition"
            );
            return None;
        }

        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    /// Drop every observation older than the maximum age, returning (before, after)
    pub fn sweep(&self, now: DateTime<Utc>) -> (usize, usize) {
        let before = self.entries.len();
        self.entries
            .retain(|_, obs| now - obs.observed_time <= self.max_age);
        (before, self.entries.len())
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
