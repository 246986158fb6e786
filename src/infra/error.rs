//! Error type for starting and running the monitor loop

use crate::infra::config::ConfigError;
use crate::io::watchdog::WatchdogError;
use thiserror::Error;

/// Fatal to the monitor: the process reports it and exits non-zero.
/// Sensor and sink failures inside the loop are logged and never surface here.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("watchdog: {0}")]
    Watchdog(#[from] WatchdogError),
}
