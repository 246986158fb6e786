//! IO modules - hardware and file interfaces
//!
//! This module contains all external IO operations:
//! - `gpio` - Photodiode sampling from the GPIO level register
//! - `watchdog` - Linux hardware watchdog device
//! - `sink` - Timestamped log and stats record files

pub mod gpio;
pub mod sink;
pub mod watchdog;

// Re-export commonly used types
pub use gpio::{BeamPins, GpioSensor, Polarity, SensorError, SensorPort};
pub use sink::{EventSink, FileSink, SinkError};
pub use watchdog::{DeviceWatchdog, WatchdogError, WatchdogPort};
