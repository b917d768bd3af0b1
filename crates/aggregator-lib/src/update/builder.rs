use crate::models::{StopTimeInstance, TripDeviation};
use crate::pending::PredictionBatch;
use crate::predictor::{Disposition, PredictionSource, StopPrediction, TripPrediction};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default bound on how early a vehicle may leave a timepoint
pub const DEFAULT_LIMIT_EARLY_DEPARTURE_SECS: i64 = 60;

/// A passed stop without its own prediction is reported this long before the observation
pub const PAST_STOP_OFFSET_SECS: i64 = 60;

/// Tolerance added before truncating traversal seconds
const TRUNCATION_EPSILON: f64 = 1e-6;

/// `at` moved by whole seconds; `None` outside the representable range
fn shift(at: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(seconds).and_then(|offset| at.checked_add_signed(offset))
}

/// Predicted arrival (and optionally departure) for one stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTimeUpdate {
    pub stop_sequence: u32,
    pub stop_id: String,
    pub arrival_delay: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub scheduled_arrival_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub predicted_arrival_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_delay: Option<i64>,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduled_departure_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub predicted_departure_time: Option<DateTime<Utc>>,
    pub prediction_source: PredictionSource,
    pub stop_status: Disposition,
    #[serde(default)]
    pub timepoint: bool,
}

impl StopTimeUpdate {
    fn arrival(stop: &StopTimeInstance, predicted: DateTime<Utc>, source: PredictionSource, status: Disposition) -> Self {
        Self {
            stop_sequence: stop.stop_sequence,
            stop_id: stop.stop_id.clone(),
            arrival_delay: (predicted - stop.arrival_date_time).num_seconds(),
            scheduled_arrival_time: stop.arrival_date_time,
            predicted_arrival_time: predicted,
            departure_delay: None,
            scheduled_departure_time: None,
            predicted_departure_time: None,
            prediction_source: source,
            stop_status: status,
            timepoint: stop.timepoint,
        }
    }

    fn with_departure(mut self, stop: &StopTimeInstance, predicted: DateTime<Utc>) -> Self {
        self.departure_delay = Some((predicted - stop.departure_date_time).num_seconds());
        self.scheduled_departure_time = Some(stop.departure_date_time);
        self.predicted_departure_time = Some(predicted);
        self
    }
}

/// Outbound prediction for one trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripUpdate {
    pub trip_id: String,
    pub route_id: String,
    pub vehicle_id: String,
    pub data_set_id: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub stop_time_update: Vec<StopTimeUpdate>,
}

/// Walks a trip's stop predictions with a running clock
///
/// The clock starts at the previous trip's last predicted time (or the
/// observation time) and advances stop by stop, so lateness carries across
/// the trips of one batch.
#[derive(Debug, Clone)]
pub struct TripUpdateBuilder {
    limit_early_departure: Duration,
}

impl Default for TripUpdateBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT_EARLY_DEPARTURE_SECS)
    }
}

struct Walk<'a> {
    deviation: &'a TripDeviation,
    clock: DateTime<Utc>,
    remainder: f64,
    updates: Vec<StopTimeUpdate>,
}

impl Walk<'_> {
    fn now(&self) -> DateTime<Utc> {
        self.deviation.timestamp
    }

    fn disposition(&self, stop: &StopTimeInstance) -> Disposition {
        Disposition::classify(self.deviation.trip_progress, stop.shape_dist_traveled)
    }

    /// Passed stop reported at its observed delay
    fn observed(&mut self, stop: &StopTimeInstance, source: PredictionSource) -> Option<()> {
        let predicted = shift(stop.arrival_date_time, self.deviation.delay)?;
        self.updates
            .push(StopTimeUpdate::arrival(stop, predicted, source, Disposition::Past));
        self.remainder = 0.0;
        self.clock = self.clock.max(self.now());
        Some(())
    }

    /// Last passed stop when the stops before it have no predictions of their own
    fn synthetic_past(&mut self, stop: &StopTimeInstance) {
        let predicted = shift(self.now(), -PAST_STOP_OFFSET_SECS)
            .unwrap_or(self.now())
            .min(stop.arrival_date_time);
        self.updates.push(StopTimeUpdate::arrival(
            stop,
            predicted,
            PredictionSource::Schedule,
            Disposition::Past,
        ));
        self.clock = self.clock.max(self.now());
    }
}

impl TripUpdateBuilder {
    pub fn new(limit_early_departure_secs: i64) -> Self {
        Self {
            limit_early_departure: Duration::seconds(limit_early_departure_secs),
        }
    }

    /// Updates for every trip in the batch, chaining the clock in service order
    pub fn build_batch(&self, batch: &PredictionBatch) -> Vec<TripUpdate> {
        let mut clock: Option<DateTime<Utc>> = None;
        batch
            .trip_predictions()
            .iter()
            .map(|prediction| {
                let seed = clock.unwrap_or(prediction.deviation().timestamp);
                let (update, last) = self.build_trip(prediction, seed);
                clock = Some(last);
                update
            })
            .collect()
    }

    /// Updates for one trip, returning the clock after its last stop
    pub fn build_trip(&self, prediction: &TripPrediction, seed: DateTime<Utc>) -> (TripUpdate, DateTime<Utc>) {
        let deviation = prediction.deviation();
        let stops = &prediction.trip().stop_time_instances;
        let predictions = prediction.stop_predictions();
        let mut walk = Walk {
            deviation,
            clock: seed,
            remainder: 0.0,
            updates: Vec::with_capacity(predictions.len() + 1),
        };

        if self.walk_stops(&mut walk, stops, &predictions).is_none() {
            warn!(
                trip_id = %deviation.trip_id,
                vehicle_id = %deviation.vehicle_id,
                delay = deviation.delay,
                stops = walk.updates.len(),
                "Predicted time out of range, truncating trip update"
            );
        }

        debug!(
            trip_id = %deviation.trip_id,
            vehicle_id = %deviation.vehicle_id,
            stops = walk.updates.len(),
            clock = %walk.clock,
            "Built trip update"
        );

        let update = TripUpdate {
            trip_id: deviation.trip_id.clone(),
            route_id: deviation.route_id.clone(),
            vehicle_id: deviation.vehicle_id.clone(),
            data_set_id: deviation.data_set_id,
            timestamp: deviation.timestamp,
            stop_time_update: walk.updates,
        };
        (update, walk.clock)
    }

    /// Push one update per stop; `None` when a predicted time overflows
    fn walk_stops(
        &self,
        walk: &mut Walk<'_>,
        stops: &[StopTimeInstance],
        predictions: &[StopPrediction],
    ) -> Option<()> {
        match predictions.first() {
            None => {
                // Entire trip behind the vehicle
                if let Some(last) = stops.last() {
                    walk.synthetic_past(last);
                }
            }
            Some(first) if first.from_index == 0 => {
                if let Some(stop) = stops.first() {
                    self.first_stop(walk, stop, first.source)?;
                }
            }
            Some(first) => {
                if let Some(stop) = stops.get(first.from_index) {
                    walk.synthetic_past(stop);
                }
            }
        }

        for stop_prediction in predictions {
            if stop_prediction.source == PredictionSource::NoFurtherPredictions {
                break;
            }
            let (Some(from), Some(to)) = (
                stops.get(stop_prediction.from_index),
                stops.get(stop_prediction.to_index),
            ) else {
                warn!(
                    trip_id = %walk.deviation.trip_id,
                    from_index = stop_prediction.from_index,
                    "Stop prediction outside trip"
                );
                break;
            };
            self.next_stop(walk, from, to, stop_prediction)?;
        }
        Some(())
    }

    fn first_stop(&self, walk: &mut Walk<'_>, stop: &StopTimeInstance, source: PredictionSource) -> Option<()> {
        let status = walk.disposition(stop);
        if status == Disposition::Past {
            return walk.observed(stop, source);
        }

        let depart = walk.now().max(walk.clock);
        let update = if depart <= stop.departure_date_time {
            walk.clock = stop.departure_date_time;
            StopTimeUpdate::arrival(stop, stop.arrival_date_time, source, status)
                .with_departure(stop, stop.departure_date_time)
        } else {
            // Late start: arrive on the running clock, leave no earlier than the observation
            let arrival = walk.clock;
            walk.clock = depart;
            StopTimeUpdate::arrival(stop, arrival, source, status).with_departure(stop, depart)
        };
        walk.updates.push(update);
        Some(())
    }

    fn next_stop(
        &self,
        walk: &mut Walk<'_>,
        from: &StopTimeInstance,
        to: &StopTimeInstance,
        prediction: &StopPrediction,
    ) -> Option<()> {
        let status = walk.disposition(to);
        match status {
            Disposition::Past => walk.observed(to, prediction.source)?,
            Disposition::At => {
                let mut predicted = walk.now();
                let earliest = self.earliest_arrival(to);
                if to.timepoint && predicted < earliest {
                    predicted = earliest;
                }
                walk.updates
                    .push(StopTimeUpdate::arrival(to, predicted, prediction.source, status));
                walk.remainder = 0.0;
                walk.clock = predicted;
            }
            Disposition::Future => {
                let traversal = self.traversal_seconds(walk, from, to, prediction);
                let whole = (traversal + TRUNCATION_EPSILON).trunc();
                walk.remainder = traversal - whole;

                let mut predicted = shift(walk.clock, whole as i64)?;
                let earliest = self.earliest_arrival(to);
                if from.timepoint && walk.disposition(from) != Disposition::Past && predicted < earliest {
                    predicted = earliest;
                }
                walk.updates
                    .push(StopTimeUpdate::arrival(to, predicted, prediction.source, status));
                walk.clock = predicted;
            }
        }
        Some(())
    }

    /// Earliest arrival the early-departure limit allows at `stop`
    fn earliest_arrival(&self, stop: &StopTimeInstance) -> DateTime<Utc> {
        stop.arrival_date_time
            .checked_sub_signed(self.limit_early_departure)
            .unwrap_or(stop.arrival_date_time)
    }

    /// Seconds still to travel to `to`, including the carried remainder
    fn traversal_seconds(
        &self,
        walk: &Walk<'_>,
        from: &StopTimeInstance,
        to: &StopTimeInstance,
        prediction: &StopPrediction,
    ) -> f64 {
        let traversal = (prediction.predicted_seconds + walk.remainder).max(0.0);
        let progress = walk.deviation.trip_progress;
        if progress <= from.shape_dist_traveled {
            return traversal;
        }

        let total = to.shape_dist_traveled - from.shape_dist_traveled;
        if total <= 0.0 {
            warn!(
                trip_id = %walk.deviation.trip_id,
                from_stop = %from.stop_id,
                to_stop = %to.stop_id,
                distance = total,
                "Non-positive distance between stops, using unadjusted travel time"
            );
            return traversal;
        }
        traversal * ((to.shape_dist_traveled - progress) / total).clamp(0.0, 1.0)
    }
}
