//! Services - crossing detection and the monitor loop
//!
//! - `crossing` - Direction-sensing state machine over two beams
//! - `monitor` - Sampling cadence, watchdog liveness and event dispatch

pub mod crossing;
pub mod monitor;

// Re-export commonly used types
pub use crossing::CrossingStateMachine;
pub use monitor::MonitorLoop;
