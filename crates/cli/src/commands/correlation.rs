//! Offline decoding of inference correlation ids

use crate::output::{format_timestamp, print_error, print_json, print_table, OutputFormat};
use aggregator_lib::pending::CorrelationId;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Serialize)]
pub struct DecodedCorrelation {
    pub batch_id: String,
    pub vehicle_id: String,
    pub report_time: Option<DateTime<Utc>>,
    pub trip_id: String,
    pub model_id: i64,
    pub model_version: i32,
}

impl From<&CorrelationId> for DecodedCorrelation {
    fn from(id: &CorrelationId) -> Self {
        Self {
            batch_id: id.batch_id.to_string(),
            vehicle_id: id.batch_id.vehicle_id().to_string(),
            report_time: DateTime::from_timestamp_millis(id.batch_id.timestamp_millis()),
            trip_id: id.trip_id.clone(),
            model_id: id.model_id,
            model_version: id.model_version,
        }
    }
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

pub fn decode(raw: &str, format: OutputFormat) -> Result<()> {
    let id: CorrelationId = match raw.parse() {
        Ok(id) => id,
        Err(e) => {
            print_error(&format!("Cannot decode {:?}", raw));
            return Err(e.into());
        }
    };
    let decoded = DecodedCorrelation::from(&id);

    match format {
        OutputFormat::Json => print_json(&decoded)?,
        OutputFormat::Table => print_table(rows(&decoded), "Nothing decoded"),
    }

    Ok(())
}

fn rows(decoded: &DecodedCorrelation) -> Vec<FieldRow> {
    vec![
        FieldRow { field: "Batch", value: decoded.batch_id.clone() },
        FieldRow { field: "Vehicle", value: decoded.vehicle_id.clone() },
        FieldRow {
            field: "Report time",
            value: decoded
                .report_time
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
        },
        FieldRow { field: "Trip", value: decoded.trip_id.clone() },
        FieldRow { field: "Model", value: decoded.model_id.to_string() },
        FieldRow { field: "Model version", value: decoded.model_version.to_string() },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fields() {
        let id: CorrelationId = "V1_1700000000000-trip42-7-3".parse().unwrap();
        let decoded = DecodedCorrelation::from(&id);

        assert_eq!(decoded.vehicle_id, "V1");
        assert_eq!(decoded.trip_id, "trip42");
        assert_eq!(decoded.model_id, 7);
        assert_eq!(decoded.model_version, 3);
        assert_eq!(
            decoded.report_time.map(format_timestamp).as_deref(),
            Some("2023-11-14 22:13:20 UTC")
        );
    }

    #[test]
    fn test_escaped_trip_id() {
        let id: CorrelationId = "V1_1700000000000-trip%2D42-7-3".parse().unwrap();
        assert_eq!(DecodedCorrelation::from(&id).trip_id, "trip-42");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not-a-correlation", OutputFormat::Json).is_err());
    }
}
