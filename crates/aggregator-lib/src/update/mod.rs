//! Conversion of finished trip predictions into absolute stop-time updates

mod builder;

pub use builder::{
    StopTimeUpdate, TripUpdate, TripUpdateBuilder, DEFAULT_LIMIT_EARLY_DEPARTURE_SECS,
    PAST_STOP_OFFSET_SECS,
};
