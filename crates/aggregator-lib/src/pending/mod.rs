//! Pending prediction batches and inference correlation
//!
//! Every vehicle report yields a [`PredictionBatch`]. Batches with outstanding
//! inference requests wait in the [`PendingPredictionsCollection`] until all
//! responses arrive (publish) or their TTL elapses (discard).

mod batch;
mod collection;
mod correlation;

pub use batch::{PendingBatchSummary, PredictionBatch};
pub use collection::{
    inference_subject, PendingPredictionsCollection, ResponseOutcome, DEFAULT_BATCH_TTL_SECS,
    MAX_PREDICTED_SECONDS,
};
pub use correlation::{BatchId, CorrelationId};
