//! Segment and trip prediction
//!
//! A [`TripPredictor`] is a per-trip template partitioned into
//! timepoint-bounded [`SegmentPredictor`]s. Predicting a deviation yields a
//! [`TripPrediction`] whose stop predictions may await ML inference.

mod cache;
mod factory;
mod features;
mod prediction;
mod segment;
mod trip;

pub use cache::{TripPredictorCache, DEFAULT_TRIP_PREDICTOR_TTL_SECS};
pub use factory::{FactoryConfig, SegmentPredictorFactory};
pub use features::{FeatureBuilder, BASE_FEATURE_COUNT, MISSING_TRANSITION_AGE_SECS};
pub use prediction::{
    Disposition, InferenceKey, PredictionSource, StopPrediction, TripPrediction,
    AT_STOP_DISTANCE,
};
pub use segment::{
    pair_scheduled_seconds, run_scheduled_seconds, PendingInference, SegmentPrediction,
    SegmentPredictor,
};
pub use trip::{TripPredictor, DEFAULT_MAX_PREDICTION_MINUTES};
