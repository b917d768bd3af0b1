//! Per-trip prediction template

use super::factory::SegmentPredictorFactory;
use super::features::FeatureBuilder;
use super::prediction::{Disposition, InferenceKey, StopPrediction, TripPrediction};
use super::segment::{PendingInference, SegmentPredictor};
use crate::models::{Model, TripDeviation, TripInstance};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Default prediction horizon
pub const DEFAULT_MAX_PREDICTION_MINUTES: i64 = 60;

/// A trip's stop sequence partitioned into timepoint-bounded segments
#[derive(Debug)]
pub struct TripPredictor {
    trip: Arc<TripInstance>,
    segments: Vec<Arc<SegmentPredictor>>,
    horizon: Duration,
}

impl TripPredictor {
    pub fn build(
        trip: Arc<TripInstance>,
        models: &HashMap<String, Model>,
        factory: &SegmentPredictorFactory,
        horizon: Duration,
    ) -> Self {
        let stops = &trip.stop_time_instances;
        let mut segments = Vec::new();
        let mut run_start = 0;

        for (i, stop) in stops.iter().enumerate().skip(1) {
            if stop.timepoint || i == stops.len() - 1 {
                segments.extend(
                    factory
                        .build_for_run(&stops[run_start..=i], run_start, models)
                        .into_iter()
                        .map(Arc::new),
                );
                run_start = i;
            }
        }

        debug!(
            trip_id = %trip.trip_id,
            stops = stops.len(),
            segments = segments.len(),
            "Built trip predictor"
        );

        Self {
            trip,
            segments,
            horizon,
        }
    }

    pub fn trip(&self) -> &Arc<TripInstance> {
        &self.trip
    }

    pub fn segments(&self) -> &[Arc<SegmentPredictor>] {
        &self.segments
    }

    pub fn last_arrival(&self) -> Option<DateTime<Utc>> {
        self.trip.last_arrival()
    }

    /// True when the trip departs before the prediction horizon ends
    pub fn within_prediction_range(&self, deviation: &TripDeviation) -> bool {
        match self.trip.first_departure() {
            Some(departure) => departure < deviation.timestamp + self.horizon,
            None => false,
        }
    }

    /// Predict the trip for one deviation, returning the inference work it needs
    pub fn predict(
        &self,
        deviation: &TripDeviation,
        features: &FeatureBuilder,
    ) -> (TripPrediction, Vec<PendingInference>) {
        let prediction = TripPrediction::new(deviation.clone(), self.trip.clone());
        let mut inferences = Vec::new();
        let cutoff = deviation.timestamp + self.horizon;
        let mut resumed = false;

        for segment in &self.segments {
            if segment.first_stop().departure_date_time >= cutoff {
                prediction.push(StopPrediction::no_further_predictions(segment.first_index()));
                break;
            }

            if !resumed {
                let last = segment.last_stop().shape_dist_traveled;
                if Disposition::classify(deviation.trip_progress, last) == Disposition::Past {
                    continue;
                }
                resumed = true;
            }

            let result = segment.predict(deviation, features);
            let key = result.inference.as_ref().map(|i| InferenceKey {
                model_id: i.model_id,
                model_version: i.model_version,
            });
            if prediction.push_segment(segment.clone(), result.stop_predictions, key) {
                inferences.extend(result.inference);
            }
        }

        (prediction, inferences)
    }
}
