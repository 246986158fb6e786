//! Domain models - beam readings, machine phases and counters
//!
//! This module contains the canonical data types used throughout the system:
//! - `BeamState` / `Diode` - one sampled photodiode level and which beam it is
//! - `Phase` - state of the crossing machine
//! - `CrossingEvent` / `Emitted` - events produced by a machine step
//! - `Counters` - running entry/exit/break totals

pub mod types;

pub use types::{BeamState, Counters, CrossingEvent, Diode, Emitted, Phase};
