//! # velsweep-core
//!
//! Shared plumbing for the velsweep harness: layered configuration,
//! error types, atomic JSON persistence, and the experiment-tracking
//! interface every training run reports through.

pub mod config;
pub mod error;
pub mod persistence;
pub mod tracking;

pub use config::{SweepConfig, config_exists, load_config};
pub use error::{ConfigError, CoreError, Result};
pub use tracking::{JsonlTracker, MemoryTracker, Metrics, RunStatus, Tracker};
