//! Aggregator configuration
//!
//! Read from an optional file named by `AGGREGATOR_CONFIG_FILE`, overridden by
//! `AGGREGATOR_*` environment variables (`__` separates nested keys, lists are
//! comma separated).

use aggregator_lib::engine::{EngineConfig, ListenerConfig, Subjects, SweepConfig};
use aggregator_lib::predictor::FactoryConfig;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::PathBuf;

pub const CONFIG_FILE_ENV: &str = "AGGREGATOR_CONFIG_FILE";

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Instance name used in logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health, metrics and debugging
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_trip_predictor_ttl")]
    pub trip_predictor_ttl_secs: i64,

    #[serde(default = "default_batch_ttl")]
    pub batch_ttl_secs: i64,

    #[serde(default)]
    pub min_rmse_improvement: f64,

    #[serde(default = "default_min_observed_stop_count")]
    pub min_observed_stop_count: u32,

    #[serde(default = "default_true")]
    pub inference_enabled: bool,

    #[serde(default = "default_limit_early_departure")]
    pub limit_early_departure_secs: i64,

    #[serde(default = "default_max_prediction_minutes")]
    pub max_prediction_minutes: i64,

    #[serde(default = "default_bucket_count")]
    pub inference_bucket_count: u32,

    /// Routes to predict; empty predicts every route
    #[serde(default)]
    pub route_allow_list: Vec<String>,

    #[serde(default = "default_transition_max_age")]
    pub transition_max_age_secs: i64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Holiday dates as `YYYY-MM-DD`
    #[serde(default)]
    pub holidays: Vec<String>,

    /// JSON array of trip instances
    #[serde(default)]
    pub schedule_file: Option<PathBuf>,

    /// JSON array of models
    #[serde(default)]
    pub models_file: Option<PathBuf>,

    #[serde(default = "default_bus_buffer")]
    pub bus_buffer: usize,

    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    #[serde(default)]
    pub subjects: Subjects,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "prediction-aggregator".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_trip_predictor_ttl() -> i64 {
    1800
}

fn default_batch_ttl() -> i64 {
    30
}

fn default_min_observed_stop_count() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_limit_early_departure() -> i64 {
    60
}

fn default_max_prediction_minutes() -> i64 {
    60
}

fn default_bucket_count() -> u32 {
    1
}

fn default_transition_max_age() -> i64 {
    1800
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_bus_buffer() -> usize {
    1024
}

fn default_drain_timeout() -> u64 {
    5
}

impl AggregatorConfig {
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("AGGREGATOR")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("route_allow_list")
                    .with_list_parse_key("holidays")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let loaded: Self = config
            .try_deserialize()
            .context("Invalid configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<()> {
        if self.inference_bucket_count == 0 {
            return Err(anyhow!("inference_bucket_count must be at least 1"));
        }
        if self.batch_ttl_secs <= 0 {
            return Err(anyhow!("batch_ttl_secs must be positive"));
        }
        self.timezone()?;
        self.holiday_dates()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|e| anyhow!("Unknown timezone {}: {}", self.timezone, e))
    }

    pub fn holiday_dates(&self) -> Result<Vec<NaiveDate>> {
        self.holidays
            .iter()
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .with_context(|| format!("Invalid holiday date {}", d))
            })
            .collect()
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            instance: self.instance.clone(),
            batch_ttl: chrono::Duration::seconds(self.batch_ttl_secs),
            trip_predictor_ttl: chrono::Duration::seconds(self.trip_predictor_ttl_secs),
            factory: FactoryConfig {
                min_rmse_improvement: self.min_rmse_improvement,
                min_observed_stop_count: self.min_observed_stop_count,
                enable_inference: self.inference_enabled,
            },
            limit_early_departure_secs: self.limit_early_departure_secs,
            max_prediction_minutes: self.max_prediction_minutes,
            inference_bucket_count: self.inference_bucket_count,
            route_allow_list: self.route_allow_list.iter().cloned().collect(),
            transition_max_age: chrono::Duration::seconds(self.transition_max_age_secs),
            timezone: self.timezone()?,
            subjects: self.subjects.clone(),
        })
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            buffer: self.bus_buffer,
            drain_timeout: std::time::Duration::from_secs(self.drain_timeout_secs),
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: std::time::Duration::from_secs(self.sweep_interval_secs),
            ..SweepConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_json(json: &str) -> AggregatorConfig {
        let config = config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()
            .unwrap();
        config.try_deserialize().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_json("{}");
        assert_eq!(config.batch_ttl_secs, 30);
        assert_eq!(config.trip_predictor_ttl_secs, 1800);
        assert_eq!(config.limit_early_departure_secs, 60);
        assert_eq!(config.inference_bucket_count, 1);
        assert!(config.validate().is_ok());

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.timezone, chrono_tz::America::Los_Angeles);
        assert!(engine.route_allow_list.is_empty());
        assert_eq!(engine.subjects.inference_response, "inference-response");
    }

    #[test]
    fn test_overrides() {
        let config = from_json(
            r#"{
                "inference_bucket_count": 4,
                "route_allow_list": ["10", "20"],
                "holidays": ["2024-07-04"],
                "timezone": "America/New_York",
                "subjects": {
                    "vehicle_monitor_results": "vmr",
                    "queue_group": "g",
                    "inference_request_prefix": "req",
                    "inference_response": "resp",
                    "trip_updates": "out"
                }
            }"#,
        );
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.inference_bucket_count, 4);
        assert!(engine.is_route_allowed("20"));
        assert!(!engine.is_route_allowed("30"));
        assert_eq!(engine.subjects.trip_updates, "out");
        assert_eq!(config.holiday_dates().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(from_json(r#"{"inference_bucket_count": 0}"#).validate().is_err());
        assert!(from_json(r#"{"timezone": "Mars/Olympus"}"#).validate().is_err());
        assert!(from_json(r#"{"holidays": ["July 4"]}"#).validate().is_err());
    }
}
