//! Shared types for the beam counter

/// Level seen by one photodiode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeamState {
    /// Laser reaches the diode, nothing in the way
    Clear,
    /// Laser interrupted, object present at this beam
    Broken,
}

/// Which of the two beams a reading belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Diode {
    Beam1,
    Beam2,
}

impl Diode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Diode::Beam1 => "beam1",
            Diode::Beam2 => "beam2",
        }
    }
}

impl std::fmt::Display for Diode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete state of the crossing machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Waiting for the doorway to be seen clear once after startup
    #[default]
    Idle,
    BothClear,
    Beam1Broken,
    BothBroken,
    Beam2Broken,
    /// Sensor released, no further transitions
    Terminated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::BothClear => "both_clear",
            Phase::Beam1Broken => "beam1_broken",
            Phase::BothBroken => "both_broken",
            Phase::Beam2Broken => "beam2_broken",
            Phase::Terminated => "terminated",
        }
    }
}

/// Event produced by a single machine step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrossingEvent {
    /// Object fully traversed beam1 then beam2
    Entered,
    /// Object fully traversed beam2 then beam1
    Exited,
    /// Beam1 newly interrupted
    Beam1Broken,
    /// Beam2 newly interrupted
    Beam2Broken,
}

impl CrossingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossingEvent::Entered => "entered",
            CrossingEvent::Exited => "exited",
            CrossingEvent::Beam1Broken => "beam1_broken",
            CrossingEvent::Beam2Broken => "beam2_broken",
        }
    }

    /// Label written to the stats sink for this event
    pub fn stat_label(&self) -> &'static str {
        match self {
            CrossingEvent::Entered => "Number of objects that entered the room",
            CrossingEvent::Exited => "Number of objects that left the room",
            CrossingEvent::Beam1Broken => "Number of times the 1st laser was broken",
            CrossingEvent::Beam2Broken => "Number of times the 2nd laser was broken",
        }
    }
}

/// Running totals, only ever incremented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub entries: u64,
    pub exits: u64,
    pub beam1_breaks: u64,
    pub beam2_breaks: u64,
}

impl Counters {
    /// Counter that `event` increments
    pub fn for_event(&self, event: CrossingEvent) -> u64 {
        match event {
            CrossingEvent::Entered => self.entries,
            CrossingEvent::Exited => self.exits,
            CrossingEvent::Beam1Broken => self.beam1_breaks,
            CrossingEvent::Beam2Broken => self.beam2_breaks,
        }
    }
}

/// An event together with the counters as they stood right after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emitted {
    pub event: CrossingEvent,
    pub counters: Counters,
}

impl Emitted {
    /// Value of the counter this event incremented
    #[inline]
    pub fn value(&self) -> u64 {
        self.counters.for_event(self.event)
    }
}
