//! Prediction aggregation engine for real-time transit arrivals
//!
//! This crate provides the core functionality for:
//! - Tracking observed stop-to-stop travel times
//! - Building segment and trip predictions from schedule, statistics and ML inference
//! - Correlating asynchronous inference responses back to pending predictions
//! - Turning finished predictions into stop-time updates
//! - Message bus plumbing, health checks and observability

pub mod bus;
pub mod engine;
pub mod error;
pub mod health;
pub mod holiday;
pub mod models;
pub mod observability;
pub mod pending;
pub mod predictor;
pub mod registry;
pub mod schedule;
pub mod transitions;
pub mod update;

pub use error::PredictionError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AggregatorMetrics, StructuredLogger};
