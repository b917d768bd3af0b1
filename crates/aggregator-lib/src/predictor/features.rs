//! Feature extraction for inference requests
//!
//! The vector is positional:
//! `[month, weekday, hour, minute, second, holiday, scheduled_segment_seconds,
//! scheduled_time_of_day, current_delay, distance_to_segment_end]` followed by one
//! `(transition_seconds, transition_age)` pair per stop pair in the segment.

use super::segment::{pair_scheduled_seconds, run_scheduled_seconds};
use crate::holiday::HolidayCalendar;
use crate::models::{StopTimeInstance, TripDeviation};
use crate::transitions::ObservedTransitions;
use chrono::{Datelike, Timelike};
use chrono_tz::Tz;
use std::sync::Arc;

/// Number of features preceding the per-pair transition features
pub const BASE_FEATURE_COUNT: usize = 10;

/// Age reported for a stop pair with no usable observation
pub const MISSING_TRANSITION_AGE_SECS: f64 = 7200.0;

/// Builds inference feature vectors for segments
#[derive(Clone)]
pub struct FeatureBuilder {
    transitions: Arc<ObservedTransitions>,
    holidays: Arc<dyn HolidayCalendar>,
    timezone: Tz,
}

impl FeatureBuilder {
    pub fn new(
        transitions: Arc<ObservedTransitions>,
        holidays: Arc<dyn HolidayCalendar>,
        timezone: Tz,
    ) -> Self {
        Self {
            transitions,
            holidays,
            timezone,
        }
    }

    pub fn transitions(&self) -> &Arc<ObservedTransitions> {
        &self.transitions
    }

    pub fn build(&self, deviation: &TripDeviation, stops: &[StopTimeInstance]) -> Vec<f64> {
        let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
            return Vec::new();
        };
        let local = deviation.timestamp.with_timezone(&self.timezone);
        let holiday = self.holidays.is_holiday(local.date_naive());

        let mut features = Vec::with_capacity(BASE_FEATURE_COUNT + 2 * stops.len());
        features.extend([
            local.month() as f64,
            local.weekday().num_days_from_sunday() as f64,
            local.hour() as f64,
            local.minute() as f64,
            local.second() as f64,
            if holiday { 1.0 } else { 0.0 },
            run_scheduled_seconds(stops),
            first.departure_time as f64,
            deviation.delay as f64,
            (last.shape_dist_traveled - deviation.trip_progress).max(0.0),
        ]);

        for pair in stops.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            match self
                .transitions
                .lookup(&from.stop_id, &to.stop_id, deviation.timestamp)
            {
                Some(observed) => {
                    let age = (deviation.timestamp - observed.observed_time).num_seconds();
                    features.push(observed.travel_seconds);
                    features.push(age.max(0) as f64);
                }
                None => {
                    features.push(pair_scheduled_seconds(from, to));
                    features.push(MISSING_TRANSITION_AGE_SECS);
                }
            }
        }

        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holiday::FixedHolidayCalendar;
    use crate::models::ObservedTransition;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

    fn stop(id: &str, at: DateTime<Utc>, seconds_of_day: i32, distance: f64) -> StopTimeInstance {
        StopTimeInstance {
            stop_id: id.to_string(),
            stop_sequence: 0,
            arrival_time: seconds_of_day,
            departure_time: seconds_of_day,
            shape_dist_traveled: distance,
            timepoint: false,
            arrival_date_time: at,
            departure_date_time: at,
        }
    }

    #[test]
    fn test_feature_vector_layout() {
        // 2024-07-04 is a Thursday; 16:30:15 UTC is 09:30:15 in Los Angeles
        let now = Utc.with_ymd_and_hms(2024, 7, 4, 16, 30, 15).unwrap();
        let transitions = Arc::new(ObservedTransitions::default());
        transitions.record(ObservedTransition {
            from_stop_id: "A".to_string(),
            to_stop_id: "B".to_string(),
            travel_seconds: 95.0,
            observed_time: now - Duration::seconds(40),
        });
        let holidays = FixedHolidayCalendar::new([NaiveDate::from_ymd_opt(2024, 7, 4).unwrap()]);
        let builder = FeatureBuilder::new(
            transitions,
            Arc::new(holidays),
            chrono_tz::America::Los_Angeles,
        );

        let stops = vec![
            stop("A", now, 34_200, 0.0),
            stop("B", now + Duration::seconds(120), 34_320, 500.0),
            stop("C", now + Duration::seconds(300), 34_500, 1200.0),
        ];
        let deviation = TripDeviation {
            data_set_id: 1,
            trip_id: "t".to_string(),
            route_id: "r".to_string(),
            vehicle_id: "v".to_string(),
            timestamp: now,
            trip_progress: 200.0,
            delay: 45,
        };

        let features = builder.build(&deviation, &stops);
        assert_eq!(
            features,
            vec![
                7.0, 4.0, 9.0, 30.0, 15.0, 1.0, 300.0, 34_200.0, 45.0, 1000.0,
                95.0, 40.0, // observed A->B
                180.0, MISSING_TRANSITION_AGE_SECS, // scheduled fallback B->C
            ]
        );
    }
}
