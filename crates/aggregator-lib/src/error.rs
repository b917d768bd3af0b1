//! Error types for prediction and correlation failures

use thiserror::Error;

/// Recoverable failures raised while predicting or correlating responses.
///
/// None of these are fatal; callers log and drop the offending message.
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("malformed correlation id: {0}")]
    Correlation(String),

    #[error("batch {0} is expired or unknown")]
    ExpiredOrUnknownBatch(String),

    #[error("no pending request for trip {trip_id} model {model_id} version {version} in batch {batch_id}")]
    UnknownRequest {
        batch_id: String,
        trip_id: String,
        model_id: i64,
        version: i32,
    },

    #[error("inference failed for request {request_id}: {message}")]
    InferenceFailed { request_id: String, message: String },

    #[error("trip schedule unavailable: {0}")]
    Schedule(String),

    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PredictionError {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionError::Correlation(_) => "correlation",
            PredictionError::ExpiredOrUnknownBatch(_) => "expired_or_unknown_batch",
            PredictionError::UnknownRequest { .. } => "unknown_request",
            PredictionError::InferenceFailed { .. } => "inference_failed",
            PredictionError::Schedule(_) => "schedule",
            PredictionError::Decode(_) => "decode",
        }
    }
}
