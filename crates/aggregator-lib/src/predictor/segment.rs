//! Travel-time prediction for a contiguous run of stops

use super::features::FeatureBuilder;
use super::prediction::{PredictionSource, StopPrediction};
use crate::models::{Model, StopTimeInstance, TripDeviation};
use std::sync::Arc;

/// Scheduled seconds between leaving `from` and reaching `to`
pub fn pair_scheduled_seconds(from: &StopTimeInstance, to: &StopTimeInstance) -> f64 {
    (to.arrival_date_time - from.departure_date_time).num_seconds() as f64
}

/// Scheduled seconds from leaving the first stop to reaching the last
pub fn run_scheduled_seconds(stops: &[StopTimeInstance]) -> f64 {
    match (stops.first(), stops.last()) {
        (Some(first), Some(last)) => pair_scheduled_seconds(first, last),
        _ => 0.0,
    }
}

/// Inference work a segment needs before its predictions are final
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInference {
    pub model_id: i64,
    pub model_version: i32,
    pub features: Vec<f64>,
}

/// Output of [`SegmentPredictor::predict`]
#[derive(Debug, Clone)]
pub struct SegmentPrediction {
    pub stop_predictions: Vec<StopPrediction>,
    pub inference: Option<PendingInference>,
}

/// Predicts travel time over a run of two or more stops
#[derive(Debug, Clone)]
pub struct SegmentPredictor {
    model: Option<Arc<Model>>,
    stops: Vec<StopTimeInstance>,
    /// Index of the first stop within the trip
    first_index: usize,
    use_inference: bool,
    use_statistics: bool,
}

impl SegmentPredictor {
    /// Returns `None` for runs shorter than two stops
    pub fn new(
        model: Option<Arc<Model>>,
        stops: Vec<StopTimeInstance>,
        first_index: usize,
        use_inference: bool,
        use_statistics: bool,
    ) -> Option<Self> {
        if stops.len() < 2 {
            return None;
        }
        // Inference and statistics both need a bound model
        let has_model = model.is_some();
        Some(Self {
            model,
            stops,
            first_index,
            use_inference: use_inference && has_model,
            use_statistics: use_statistics && has_model,
        })
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_deref()
    }

    pub fn stops(&self) -> &[StopTimeInstance] {
        &self.stops
    }

    pub fn first_index(&self) -> usize {
        self.first_index
    }

    pub fn first_stop(&self) -> &StopTimeInstance {
        &self.stops[0]
    }

    pub fn last_stop(&self) -> &StopTimeInstance {
        &self.stops[self.stops.len() - 1]
    }

    pub fn uses_inference(&self) -> bool {
        self.use_inference
    }

    pub fn uses_statistics(&self) -> bool {
        self.use_statistics
    }

    /// Whether this segment spans intermediate stops
    pub fn is_multi_stop(&self) -> bool {
        self.stops.len() > 2
    }

    pub fn scheduled_seconds(&self) -> f64 {
        run_scheduled_seconds(&self.stops)
    }

    /// Historical average when trusted, otherwise the schedule
    pub fn statistical_time(&self) -> (f64, PredictionSource) {
        match self.model.as_deref() {
            Some(model) if self.use_statistics && model.average_time > 0.0 => {
                let source = if self.is_multi_stop() {
                    PredictionSource::TimepointStatistics
                } else {
                    PredictionSource::StopStatistics
                };
                (model.average_time, source)
            }
            _ => (self.scheduled_seconds(), PredictionSource::Schedule),
        }
    }

    /// Inference is only worth requesting while the segment is still ahead of the vehicle
    pub fn needs_inference(&self, deviation: &TripDeviation) -> bool {
        self.use_inference && deviation.trip_progress <= self.last_stop().shape_dist_traveled
    }

    pub fn predict(&self, deviation: &TripDeviation, features: &FeatureBuilder) -> SegmentPrediction {
        let (seconds, source) = self.statistical_time();
        let needs_inference = self.needs_inference(deviation);
        let stop_predictions = self.allocate(seconds, source, !needs_inference);

        let inference = match self.model.as_deref() {
            Some(model) if needs_inference => Some(PendingInference {
                model_id: model.id,
                model_version: model.version,
                features: features.build(deviation, &self.stops),
            }),
            _ => None,
        };

        SegmentPrediction {
            stop_predictions,
            inference,
        }
    }

    /// Redistribute an inference scalar over the segment's stop pairs
    pub fn apply_response(&self, predicted_seconds: f64) -> Vec<StopPrediction> {
        let source = if self.is_multi_stop() {
            PredictionSource::TimepointMl
        } else {
            PredictionSource::StopMl
        };
        self.allocate(predicted_seconds, source, true)
    }

    /// Split `total_seconds` across stop pairs by their share of scheduled time
    pub fn allocate(&self, total_seconds: f64, source: PredictionSource, complete: bool) -> Vec<StopPrediction> {
        let pair_seconds: Vec<f64> = self
            .stops
            .windows(2)
            .map(|pair| pair_scheduled_seconds(&pair[0], &pair[1]).max(0.0))
            .collect();
        let scheduled_total: f64 = pair_seconds.iter().sum();
        let pairs = pair_seconds.len() as f64;

        pair_seconds
            .iter()
            .enumerate()
            .map(|(i, seconds)| {
                let share = if scheduled_total > 0.0 {
                    seconds / scheduled_total
                } else {
                    1.0 / pairs
                };
                StopPrediction {
                    from_index: self.first_index + i,
                    to_index: self.first_index + i + 1,
                    predicted_seconds: total_seconds * share,
                    source,
                    complete,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holiday::FixedHolidayCalendar;
    use crate::transitions::ObservedTransitions;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap()
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

    fn model(average_time: f64) -> Arc<Model> {
        Arc::new(Model {
            id: 7,
            version: 3,
            name: "A_B_C".to_string(),
            trained: true,
            avg_rmse: 60.0,
            ml_rmse: 40.0,
            average_time,
            median_time: average_time,
            observed_stop_count: 50,
        })
    }

    fn deviation(progress: f64) -> TripDeviation {
        TripDeviation {
            data_set_id: 1,
            trip_id: "trip42".to_string(),
            route_id: "R1".to_string(),
            vehicle_id: "V1".to_string(),
            timestamp: base(),
            trip_progress: progress,
            delay: 0,
        }
    }

    fn features() -> FeatureBuilder {
        FeatureBuilder::new(
            Arc::new(ObservedTransitions::default()),
            Arc::new(FixedHolidayCalendar::default()),
            chrono_tz::UTC,
        )
    }

    fn three_stop_run() -> Vec<StopTimeInstance> {
        vec![stop("A", 0, 0.0), stop("B", 300, 400.0), stop("C", 900, 1000.0)]
    }

    #[test]
    fn test_rejects_single_stop_run() {
        assert!(SegmentPredictor::new(None, vec![stop("A", 0, 0.0)], 0, false, false).is_none());
    }

    #[test]
    fn test_allocation_is_proportional_to_schedule() {
        let segment = SegmentPredictor::new(None, three_stop_run(), 4, false, false).unwrap();
        let predictions = segment.allocate(1800.0, PredictionSource::Schedule, true);

        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].from_index, 4);
        assert_eq!(predictions[1].to_index, 6);
        assert!((predictions[0].predicted_seconds - 600.0).abs() < 1e-9);
        assert!((predictions[1].predicted_seconds - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn test_allocation_sums_to_total() {
        let run = vec![
            stop("A", 0, 0.0),
            stop("B", 97, 100.0),
            stop("C", 211, 200.0),
            stop("D", 333, 300.0),
            stop("E", 401, 400.0),
        ];
        let segment = SegmentPredictor::new(None, run, 0, false, false).unwrap();
        let total: f64 = segment
            .allocate(517.3, PredictionSource::Schedule, true)
            .iter()
            .map(|p| p.predicted_seconds)
            .sum();
        assert!((total - 517.3).abs() < 1e-9);
    }

    #[test]
    fn test_zero_schedule_splits_evenly() {
        let run = vec![stop("A", 0, 0.0), stop("B", 0, 10.0), stop("C", 0, 20.0)];
        let segment = SegmentPredictor::new(None, run, 0, false, false).unwrap();
        let predictions = segment.allocate(100.0, PredictionSource::Schedule, true);
        assert!(predictions.iter().all(|p| (p.predicted_seconds - 50.0).abs() < 1e-9));
    }

    #[test]
    fn test_statistics_source_depends_on_run_length() {
        let multi = SegmentPredictor::new(Some(model(840.0)), three_stop_run(), 0, false, true).unwrap();
        assert_eq!(multi.statistical_time(), (840.0, PredictionSource::TimepointStatistics));

        let pair = SegmentPredictor::new(
            Some(model(100.0)),
            vec![stop("A", 0, 0.0), stop("B", 120, 100.0)],
            0,
            false,
            true,
        )
        .unwrap();
        assert_eq!(pair.statistical_time(), (100.0, PredictionSource::StopStatistics));
    }

    #[test]
    fn test_untrusted_statistics_fall_back_to_schedule() {
        let segment = SegmentPredictor::new(Some(model(840.0)), three_stop_run(), 0, false, false).unwrap();
        assert_eq!(segment.statistical_time(), (900.0, PredictionSource::Schedule));
    }

    #[test]
    fn test_predict_without_inference_is_complete() {
        let segment = SegmentPredictor::new(None, three_stop_run(), 0, true, true).unwrap();
        let prediction = segment.predict(&deviation(0.0), &features());

        assert!(prediction.inference.is_none());
        assert!(prediction.stop_predictions.iter().all(|p| p.complete));
    }

    #[test]
    fn test_predict_requests_inference_when_ahead() {
        let segment = SegmentPredictor::new(Some(model(840.0)), three_stop_run(), 0, true, true).unwrap();
        let prediction = segment.predict(&deviation(200.0), &features());

        let inference = prediction.inference.unwrap();
        assert_eq!((inference.model_id, inference.model_version), (7, 3));
        assert_eq!(inference.features.len(), super::super::BASE_FEATURE_COUNT + 4);
        assert!(prediction.stop_predictions.iter().all(|p| !p.complete));
    }

    #[test]
    fn test_no_inference_once_segment_is_behind() {
        let segment = SegmentPredictor::new(Some(model(840.0)), three_stop_run(), 0, true, true).unwrap();
        let prediction = segment.predict(&deviation(1000.5), &features());

        assert!(prediction.inference.is_none());
        assert!(prediction.stop_predictions.iter().all(|p| p.complete));
    }

    #[test]
    fn test_apply_response_marks_ml_complete() {
        let segment = SegmentPredictor::new(Some(model(840.0)), three_stop_run(), 0, true, true).unwrap();
        let predictions = segment.apply_response(1200.0);

        assert!(predictions.iter().all(|p| p.complete && p.source == PredictionSource::TimepointMl));
        assert!((predictions[0].predicted_seconds - 400.0).abs() < 1e-9);
        assert!((predictions[1].predicted_seconds - 800.0).abs() < 1e-9);
    }
}
