//! Subcommand implementations

pub mod correlation;
pub mod pending;
pub mod publish;
pub mod status;
