//! Direction-sensing state machine for the two-beam doorway
//!
//! Turns sampled `(beam1, beam2)` pairs into confirmed crossings. The direction
//! counter walks +1 per forward step and -1 per backward step through the
//! sequence `one beam -> both -> other beam -> clear`; only a monotonic run
//! reaching ±4 counts as a crossing, so an object that backs out never
//! increments `entries` or `exits`.

use crate::domain::types::{BeamState, Counters, CrossingEvent, Emitted, Phase};
use smallvec::SmallVec;
use tracing::{debug, trace};

/// |d| at which a traversal is confirmed
pub const CROSSING_MAGNITUDE: i8 = 4;

/// Events emitted by one step (never more than one in practice)
pub type StepEvents = SmallVec<[Emitted; 2]>;

/// Crossing state machine
///
/// Owns the phase, the direction counter and the running counters. Has no I/O.
#[derive(Debug, Clone, Default)]
pub struct CrossingStateMachine {
    phase: Phase,
    /// Signed progress through the current traversal, always in [-4, 4]
    direction: i8,
    counters: Counters,
}

impl CrossingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample and return the events it produced
    pub fn step(&mut self, beam1: BeamState, beam2: BeamState) -> StepEvents {
        use BeamState::{Broken, Clear};

        let mut events = StepEvents::new();
        let prev = self.phase;

        match (self.phase, beam1, beam2) {
            (Phase::Idle, Clear, Clear) => {
                self.phase = Phase::BothClear;
                self.direction = 0;
            }
            (Phase::Idle, _, _) => {}

            (Phase::BothClear, Broken, Clear) => {
                self.phase = Phase::Beam1Broken;
                self.direction = 1;
                self.counters.beam1_breaks += 1;
                self.emit(&mut events, CrossingEvent::Beam1Broken);
            }
            (Phase::BothClear, Clear, Broken) => {
                self.phase = Phase::Beam2Broken;
                self.direction = -1;
                self.counters.beam2_breaks += 1;
                self.emit(&mut events, CrossingEvent::Beam2Broken);
            }
            // Both beams cannot break inside one sample from clear; ignore it
            (Phase::BothClear, _, _) => {}

            (Phase::Beam1Broken, Broken, Broken) => {
                self.phase = Phase::BothBroken;
                self.direction += 1;
                self.counters.beam2_breaks += 1;
                self.emit(&mut events, CrossingEvent::Beam2Broken);
            }
            (Phase::Beam1Broken, Clear, Clear) => {
                self.direction -= 1;
                if self.direction == -CROSSING_MAGNITUDE {
                    self.counters.exits += 1;
                    self.emit(&mut events, CrossingEvent::Exited);
                }
                self.return_to_clear();
            }
            (Phase::Beam1Broken, _, _) => {}

            (Phase::BothBroken, Clear, Broken) => {
                self.phase = Phase::Beam2Broken;
                self.direction += 1;
            }
            (Phase::BothBroken, Broken, Clear) => {
                self.phase = Phase::Beam1Broken;
                self.direction -= 1;
            }
            (Phase::BothBroken, _, _) => {}

            (Phase::Beam2Broken, Broken, Broken) => {
                self.phase = Phase::BothBroken;
                self.direction -= 1;
                self.counters.beam1_breaks += 1;
                self.emit(&mut events, CrossingEvent::Beam1Broken);
            }
            (Phase::Beam2Broken, Clear, Clear) => {
                self.direction += 1;
                if self.direction == CROSSING_MAGNITUDE {
                    self.counters.entries += 1;
                    self.emit(&mut events, CrossingEvent::Entered);
                }
                self.return_to_clear();
            }
            (Phase::Beam2Broken, _, _) => {}

            (Phase::Terminated, _, _) => {}
        }

        if self.phase != prev {
            trace!(
                from = %prev.as_str(),
                to = %self.phase.as_str(),
                direction = %self.direction,
                "crossing_transition"
            );
        }

        events
    }

    /// Enter the terminal phase; later samples are ignored
    pub fn terminate(&mut self) {
        debug!(from = %self.phase.as_str(), "crossing_terminated");
        self.phase = Phase::Terminated;
        self.direction = 0;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn direction(&self) -> i8 {
        self.direction
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == Phase::Terminated
    }

    fn return_to_clear(&mut self) {
        self.phase = Phase::BothClear;
        self.direction = 0;
    }

    fn emit(&self, events: &mut StepEvents, event: CrossingEvent) {
        events.push(Emitted { event, counters: self.counters });
    }
}
