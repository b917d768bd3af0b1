//! Core data models for the prediction aggregator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled stop visit on a dated trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTimeInstance {
    pub stop_id: String,
    pub stop_sequence: u32,
    /// Scheduled arrival in seconds after service-day midnight
    pub arrival_time: i32,
    /// Scheduled departure in seconds after service-day midnight
    pub departure_time: i32,
    pub shape_dist_traveled: f64,
    #[serde(default)]
    pub timepoint: bool,
    pub arrival_date_time: DateTime<Utc>,
    pub departure_date_time: DateTime<Utc>,
}

/// A dated trip with its ordered stop visits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripInstance {
    pub data_set_id: i64,
    pub trip_id: String,
    pub route_id: String,
    pub stop_time_instances: Vec<StopTimeInstance>,
}

impl TripInstance {
    /// Scheduled departure from the first stop
    pub fn first_departure(&self) -> Option<DateTime<Utc>> {
        self.stop_time_instances
            .first()
            .map(|s| s.departure_date_time)
    }

    /// Scheduled arrival at the last stop
    pub fn last_arrival(&self) -> Option<DateTime<Utc>> {
        self.stop_time_instances.last().map(|s| s.arrival_date_time)
    }
}

/// One observation of a vehicle's progress and delay on a trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripDeviation {
    pub data_set_id: i64,
    pub trip_id: String,
    pub route_id: String,
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
    /// Distance traveled along the trip shape
    pub trip_progress: f64,
    /// Current delay in seconds, negative when early
    pub delay: i64,
}

/// Measured travel time between two adjacent stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedTransition {
    pub from_stop_id: String,
    pub to_stop_id: String,
    pub travel_seconds: f64,
    pub observed_time: DateTime<Utc>,
}

/// Payload of the vehicle monitor results subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleMonitorResults {
    #[serde(default)]
    pub observed_stop_transitions: Vec<ObservedTransition>,
    #[serde(default)]
    pub trip_deviations: Vec<TripDeviation>,
}

/// A travel-time model trained on an ordered run of stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub version: i32,
    /// Stop ids the model was trained on, joined by [`Model::NAME_SEPARATOR`]
    pub name: String,
    #[serde(default)]
    pub trained: bool,
    /// Validated RMSE of the historical average baseline
    #[serde(default)]
    pub avg_rmse: f64,
    /// Validated RMSE of the ML model
    #[serde(default)]
    pub ml_rmse: f64,
    #[serde(default)]
    pub average_time: f64,
    #[serde(default)]
    pub median_time: f64,
    #[serde(default)]
    pub observed_stop_count: u32,
}

impl Model {
    pub const NAME_SEPARATOR: &'static str = "_";

    /// Name of the model covering the given ordered stop ids
    pub fn name_for<'a, I>(stop_ids: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        stop_ids
            .into_iter()
            .collect::<Vec<_>>()
            .join(Self::NAME_SEPARATOR)
    }
}

/// Request published to an inference worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub request_id: String,
    pub ml_model_id: i64,
    pub version: i32,
    pub features: Vec<f64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Response from an inference worker, carrying either a scalar or an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub request_id: String,
    #[serde(default)]
    pub prediction: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_joins_stop_ids() {
        assert_eq!(Model::name_for(["100", "101", "102"]), "100_101_102");
        assert_eq!(Model::name_for(Vec::<&str>::new()), "");
    }

    #[test]
    fn test_vehicle_monitor_results_defaults_missing_lists() {
        let results: VehicleMonitorResults = serde_json::from_str("{}").unwrap();
        assert!(results.observed_stop_transitions.is_empty());
        assert!(results.trip_deviations.is_empty());
    }

    #[test]
    fn test_inference_request_timestamp_in_millis() {
        let request = InferenceRequest {
            request_id: "V1_1700000000000-trip42-7-3".to_string(),
            ml_model_id: 7,
            version: 3,
            features: vec![1.0, 2.0],
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert_eq!(json["ml_model_id"], 7);
    }
}
