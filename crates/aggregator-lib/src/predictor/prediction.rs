//! Stop and trip prediction results

use super::segment::SegmentPredictor;
use crate::error::PredictionError;
use crate::models::{TripDeviation, TripInstance};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Distance within which a vehicle counts as being at a stop
pub const AT_STOP_DISTANCE: f64 = 2.0;

/// Where a predicted travel time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Schedule,
    StopStatistics,
    TimepointStatistics,
    StopMl,
    TimepointMl,
    NoFurtherPredictions,
}

impl fmt::Display for PredictionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionSource::Schedule => write!(f, "schedule"),
            PredictionSource::StopStatistics => write!(f, "stop_statistics"),
            PredictionSource::TimepointStatistics => write!(f, "timepoint_statistics"),
            PredictionSource::StopMl => write!(f, "stop_ml"),
            PredictionSource::TimepointMl => write!(f, "timepoint_ml"),
            PredictionSource::NoFurtherPredictions => write!(f, "no_further_predictions"),
        }
    }
}

/// Position of a stop relative to the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Past,
    At,
    Future,
}

impl Disposition {
    /// Classify a stop at `stop_distance` for a vehicle at `progress`
    pub fn classify(progress: f64, stop_distance: f64) -> Self {
        if (progress - stop_distance).abs() <= AT_STOP_DISTANCE {
            Disposition::At
        } else if progress > stop_distance {
            Disposition::Past
        } else {
            Disposition::Future
        }
    }
}

/// Predicted travel between two adjacent stops of a trip
#[derive(Debug, Clone, PartialEq)]
pub struct StopPrediction {
    /// Index of the from-stop in the trip's stop list
    pub from_index: usize,
    /// Index of the to-stop; always `from_index + 1`
    pub to_index: usize,
    pub predicted_seconds: f64,
    pub source: PredictionSource,
    pub complete: bool,
}

impl StopPrediction {
    /// Marker that ends a trip's predictions at the prediction horizon
    pub fn no_further_predictions(from_index: usize) -> Self {
        Self {
            from_index,
            to_index: from_index + 1,
            predicted_seconds: 0.0,
            source: PredictionSource::NoFurtherPredictions,
            complete: true,
        }
    }
}

/// Identifies a pending inference request within one trip prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InferenceKey {
    pub model_id: i64,
    pub model_version: i32,
}

#[derive(Debug)]
struct AwaitingSegment {
    segment: Arc<SegmentPredictor>,
    /// Position of the segment's first stop prediction
    offset: usize,
}

#[derive(Debug)]
struct PredictionState {
    predictions: Vec<StopPrediction>,
    awaiting: HashMap<InferenceKey, AwaitingSegment>,
}

/// Predictions for one trip derived from one deviation
///
/// The stop list is mutated only by inference application, under its own lock.
#[derive(Debug)]
pub struct TripPrediction {
    deviation: TripDeviation,
    trip: Arc<TripInstance>,
    state: Mutex<PredictionState>,
}

impl TripPrediction {
    pub(crate) fn new(deviation: TripDeviation, trip: Arc<TripInstance>) -> Self {
        Self {
            deviation,
            trip,
            state: Mutex::new(PredictionState {
                predictions: Vec::new(),
                awaiting: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PredictionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a segment's predictions, registering it as awaiting inference when keyed
    ///
    /// Returns whether a request must be sent for the key. A key already awaited
    /// by an earlier segment (a loop trip revisiting the same stop pair) keeps its
    /// statistical time and completes immediately.
    pub(crate) fn push_segment(
        &self,
        segment: Arc<SegmentPredictor>,
        mut predictions: Vec<StopPrediction>,
        awaiting: Option<InferenceKey>,
    ) -> bool {
        let mut state = self.state();
        let offset = state.predictions.len();
        let registered = match awaiting {
            Some(key) if !state.awaiting.contains_key(&key) => {
                state.awaiting.insert(key, AwaitingSegment { segment, offset });
                true
            }
            Some(_) => {
                for prediction in &mut predictions {
                    prediction.complete = true;
                }
                false
            }
            None => false,
        };
        state.predictions.extend(predictions);
        registered
    }

    pub(crate) fn push(&self, prediction: StopPrediction) {
        self.state().predictions.push(prediction);
    }

    pub fn deviation(&self) -> &TripDeviation {
        &self.deviation
    }

    pub fn trip(&self) -> &Arc<TripInstance> {
        &self.trip
    }

    pub fn trip_id(&self) -> &str {
        &self.deviation.trip_id
    }

    /// Snapshot of the ordered stop predictions
    pub fn stop_predictions(&self) -> Vec<StopPrediction> {
        self.state().predictions.clone()
    }

    /// Number of inference requests still awaited
    pub fn pending_requests(&self) -> usize {
        self.state().awaiting.len()
    }

    /// Number of stop predictions not yet complete
    pub fn incomplete_predictions(&self) -> usize {
        self.state()
            .predictions
            .iter()
            .filter(|p| !p.complete)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.pending_requests() == 0
    }

    /// Keys of the inference requests still awaited
    pub fn awaiting_keys(&self) -> Vec<InferenceKey> {
        self.state().awaiting.keys().copied().collect()
    }

    /// Apply an inference scalar to the awaiting segment, returning requests still pending
    pub fn apply_inference(
        &self,
        batch_id: &str,
        key: InferenceKey,
        predicted_seconds: f64,
    ) -> Result<usize, PredictionError> {
        let mut state = self.state();
        let awaiting = state
            .awaiting
            .remove(&key)
            .ok_or_else(|| PredictionError::UnknownRequest {
                batch_id: batch_id.to_string(),
                trip_id: self.deviation.trip_id.clone(),
                model_id: key.model_id,
                version: key.model_version,
            })?;

        let replacement = awaiting.segment.apply_response(predicted_seconds);
        let end = awaiting.offset + replacement.len();
        state.predictions.splice(awaiting.offset..end, replacement);

        debug_assert_eq!(
            state.awaiting.is_empty(),
            state.predictions.iter().all(|p| p.complete)
        );
        Ok(state.awaiting.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_tolerance() {
        assert_eq!(Disposition::classify(100.0, 100.0), Disposition::At);
        assert_eq!(Disposition::classify(101.5, 100.0), Disposition::At);
        assert_eq!(Disposition::classify(98.0, 100.0), Disposition::At);
        assert_eq!(Disposition::classify(102.5, 100.0), Disposition::Past);
        assert_eq!(Disposition::classify(97.0, 100.0), Disposition::Future);
    }

    #[test]
    fn test_no_further_predictions_marker() {
        let marker = StopPrediction::no_further_predictions(4);
        assert_eq!(marker.to_index, 5);
        assert!(marker.complete);
        assert_eq!(marker.source, PredictionSource::NoFurtherPredictions);
    }

    #[test]
    fn test_source_serializes_snake_case() {
        let json = serde_json::to_string(&PredictionSource::TimepointMl).unwrap();
        assert_eq!(json, "\"timepoint_ml\"");
        assert_eq!(PredictionSource::StopStatistics.to_string(), "stop_statistics");
    }
}
