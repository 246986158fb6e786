//! Infrastructure - configuration, metrics, and errors
//!
//! This module contains infrastructure concerns:
//! - `config` - Positional config file parsing and runtime settings
//! - `metrics` - Loop health counters and periodic summary
//! - `error` - Fatal error taxonomy
//! - `shutdown` - Signal handling for orderly stop

pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use error::MonitorError;
pub use metrics::LoopMetrics;
