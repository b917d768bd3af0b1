//! Correlation ids linking inference responses to pending requests
//!
//! Rendered as `{batch_id}-{trip_id}-{model_id}-{version}`. The free-text
//! components are percent-escaped for `%` and `-`, so any vehicle or trip id
//! round-trips without collisions while plain ids render unchanged.

use crate::error::PredictionError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

const DELIMITER: char = '-';
const BATCH_TIME_SEPARATOR: char = '_';

/// Identifies the batch built from one vehicle report: `{vehicle_id}_{unix_millis}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(vehicle_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self(format!(
            "{}{}{}",
            vehicle_id,
            BATCH_TIME_SEPARATOR,
            timestamp.timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Vehicle id part; may itself contain underscores
    pub fn vehicle_id(&self) -> &str {
        self.split().0
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.split().1
    }

    fn split(&self) -> (&str, i64) {
        // Validated on construction
        match self.0.rsplit_once(BATCH_TIME_SEPARATOR) {
            Some((vehicle, millis)) => (vehicle, millis.parse().unwrap_or_default()),
            None => (&self.0, 0),
        }
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BatchId {
    type Err = PredictionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(BATCH_TIME_SEPARATOR) {
            Some((vehicle, millis)) if !vehicle.is_empty() && millis.parse::<i64>().is_ok() => {
                Ok(Self(s.to_string()))
            }
            _ => Err(PredictionError::Correlation(format!("invalid batch id {:?}", s))),
        }
    }
}

/// Structured key of one inference request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    pub batch_id: BatchId,
    pub trip_id: String,
    pub model_id: i64,
    pub model_version: i32,
}

impl CorrelationId {
    pub fn new(batch_id: BatchId, trip_id: impl Into<String>, model_id: i64, model_version: i32) -> Self {
        Self {
            batch_id,
            trip_id: trip_id.into(),
            model_id,
            model_version,
        }
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{d}{}{d}{}{d}{}",
            escape(self.batch_id.as_str()),
            escape(&self.trip_id),
            self.model_id,
            self.model_version,
            d = DELIMITER
        )
    }
}

impl FromStr for CorrelationId {
    type Err = PredictionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PredictionError::Correlation(s.to_string());

        let parts: Vec<&str> = s.split(DELIMITER).collect();
        let [batch, trip, model_id, version] = parts.as_slice() else {
            return Err(malformed());
        };

        let batch_id: BatchId = unescape(batch).ok_or_else(malformed)?.parse()?;
        let trip_id = unescape(trip).filter(|t| !t.is_empty()).ok_or_else(malformed)?;
        let model_id = model_id.parse().map_err(|_| malformed())?;
        let model_version = version.parse().map_err(|_| malformed())?;

        Ok(Self {
            batch_id,
            trip_id,
            model_id,
            model_version,
        })
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            DELIMITER => escaped.push_str("%2D"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
