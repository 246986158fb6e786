//! Loop health metrics and periodic reporting
//!
//! Owned by the monitor loop, so plain integers are enough. Totals are
//! monotonic; the kick-gap maximum and per-window counts reset on report.

use crate::domain::types::Counters;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Health counters for the sampling loop
#[derive(Debug, Default)]
pub struct LoopMetrics {
    /// Cycles completed since start (monotonic)
    cycles_total: u64,
    /// Cycles since last report (reset on report)
    cycles_since_report: u64,
    /// Successful watchdog kicks (monotonic)
    kicks_total: u64,
    /// Failed keep-alive calls (monotonic)
    kick_failures_total: u64,
    /// Cycles skipped because a beam read failed (monotonic)
    read_failures_total: u64,
    /// Records the sink could not write (monotonic)
    sink_failures_total: u64,
    /// Time of the last successful kick
    last_kick: Option<Instant>,
    /// Largest gap between kicks (reset on report)
    max_kick_gap: Duration,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&mut self) {
        self.cycles_total += 1;
        self.cycles_since_report += 1;
    }

    pub fn record_kick(&mut self, at: Instant) {
        if let Some(last) = self.last_kick {
            let gap = at.saturating_duration_since(last);
            if gap > self.max_kick_gap {
                self.max_kick_gap = gap;
            }
        }
        self.last_kick = Some(at);
        self.kicks_total += 1;
    }

    pub fn record_kick_failure(&mut self) {
        self.kick_failures_total += 1;
    }

    pub fn record_read_failure(&mut self) {
        self.read_failures_total += 1;
    }

    pub fn record_sink_failure(&mut self) {
        self.sink_failures_total += 1;
    }

    pub fn cycles_total(&self) -> u64 {
        self.cycles_total
    }

    pub fn kicks_total(&self) -> u64 {
        self.kicks_total
    }

    pub fn kick_failures_total(&self) -> u64 {
        self.kick_failures_total
    }

    pub fn read_failures_total(&self) -> u64 {
        self.read_failures_total
    }

    pub fn sink_failures_total(&self) -> u64 {
        self.sink_failures_total
    }

    pub fn max_kick_gap(&self) -> Duration {
        self.max_kick_gap
    }

    /// Snapshot for logging; resets the windowed values
    pub fn report(&mut self, counters: Counters, watchdog_timeout: Duration) -> MetricsSummary {
        let summary = MetricsSummary {
            cycles_total: self.cycles_total,
            cycles_window: self.cycles_since_report,
            kicks_total: self.kicks_total,
            kick_failures_total: self.kick_failures_total,
            read_failures_total: self.read_failures_total,
            sink_failures_total: self.sink_failures_total,
            max_kick_gap_ms: self.max_kick_gap.as_millis() as u64,
            watchdog_timeout_ms: watchdog_timeout.as_millis() as u64,
            counters,
        };
        self.cycles_since_report = 0;
        self.max_kick_gap = Duration::ZERO;
        summary
    }
}

/// Point-in-time view of loop health and counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles_window: u64,
    pub kicks_total: u64,
    pub kick_failures_total: u64,
    pub read_failures_total: u64,
    pub sink_failures_total: u64,
    pub max_kick_gap_ms: u64,
    pub watchdog_timeout_ms: u64,
    pub counters: Counters,
}

impl MetricsSummary {
    /// Kick gap above half the timeout means the loop is close to a reset
    pub fn kick_margin_low(&self) -> bool {
        self.max_kick_gap_ms * 2 >= self.watchdog_timeout_ms
    }

    pub fn log(&self) {
        info!(
            cycles = %self.cycles_total,
            cycles_window = %self.cycles_window,
            kicks = %self.kicks_total,
            kick_failures = %self.kick_failures_total,
            read_failures = %self.read_failures_total,
            sink_failures = %self.sink_failures_total,
            max_kick_gap_ms = %self.max_kick_gap_ms,
            entries = %self.counters.entries,
            exits = %self.counters.exits,
            beam1_breaks = %self.counters.beam1_breaks,
            beam2_breaks = %self.counters.beam2_breaks,
            "monitor_summary"
        );

        if self.kick_margin_low() {
            warn!(
                max_kick_gap_ms = %self.max_kick_gap_ms,
                watchdog_timeout_ms = %self.watchdog_timeout_ms,
                "watchdog_margin_low"
            );
        }
    }
}
