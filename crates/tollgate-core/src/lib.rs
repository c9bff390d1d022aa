//! # Tollgate Core
//!
//! The domain layer of the tollgate middleware.
//! This crate contains the configuration model, period math, decision
//! records, and ports, with zero infrastructure dependencies.

pub mod config;
pub mod decision;
pub mod error;
pub mod period;
pub mod ports;

pub use config::GateConfig;
pub use error::{ConfigError, GateError, StoreError};
