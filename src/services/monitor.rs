//! Monitor loop - sampling cadence, watchdog liveness and event dispatch
//!
//! Each cycle, in this order:
//! 1. kick the watchdog (even when the sensor is failing)
//! 2. write a liveness record
//! 3. read both beams
//! 4. wait for the pacing tick
//! 5. step the crossing machine, unless a read failed
//! 6. write a stat record per emitted event
//!
//! The loop owns every port and all counters; nothing is shared.

use crate::domain::types::{BeamState, Counters, Diode, Emitted, Phase};
use crate::infra::config::Config;
use crate::infra::error::MonitorError;
use crate::infra::metrics::LoopMetrics;
use crate::io::gpio::SensorPort;
use crate::io::sink::EventSink;
use crate::io::watchdog::{WatchdogError, WatchdogPort};
use crate::services::crossing::CrossingStateMachine;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

pub const MSG_GPIO_INITIALIZED: &str = "The GPIO pins have been initialized";
pub const MSG_WATCHDOG_OPENED: &str = "The Watchdog file has been opened";
pub const MSG_WATCHDOG_TIMEOUT_SET: &str = "The Watchdog time limit has been set";
pub const MSG_WATCHDOG_KICKED: &str = "The Watchdog was kicked";
pub const MSG_GPIO_FREED: &str = "The GPIO pins have been freed";
pub const MSG_WATCHDOG_DISARMED: &str = "The Watchdog has been disarmed";

/// Sampling loop for one doorway
pub struct MonitorLoop<S, W, E> {
    config: Config,
    sensor: S,
    watchdog: W,
    sink: E,
    machine: CrossingStateMachine,
    metrics: LoopMetrics,
    /// Timeout reported back by the device after arming
    effective_timeout: Option<Duration>,
}

impl<S, W, E> MonitorLoop<S, W, E>
where
    S: SensorPort,
    W: WatchdogPort,
    E: EventSink,
{
    /// Take ownership of already-acquired ports
    pub fn new(config: Config, sensor: S, watchdog: W, sink: E) -> Self {
        Self {
            config,
            sensor,
            watchdog,
            sink,
            machine: CrossingStateMachine::new(),
            metrics: LoopMetrics::new(),
            effective_timeout: None,
        }
    }

    /// Record the acquisitions and arm the watchdog with the configured timeout
    pub fn start(&mut self) -> Result<(), MonitorError> {
        self.config.validate()?;

        self.log(MSG_GPIO_INITIALIZED);
        self.log(MSG_WATCHDOG_OPENED);

        let requested = self.config.watchdog_timeout_secs();
        self.watchdog.arm(requested)?;
        self.log(MSG_WATCHDOG_TIMEOUT_SET);

        let effective = self.watchdog.current_timeout()?;
        info!(requested_secs = %requested, effective_secs = %effective, "watchdog_timeout");

        // The device may round the timeout; the pacing must still fit twice over
        let poll_ms = self.config.poll_interval_ms();
        if u64::from(effective) * 1000 <= poll_ms * 2 {
            return Err(WatchdogError::TimeoutTooShort { effective, poll_ms }.into());
        }

        self.effective_timeout = Some(Duration::from_secs(u64::from(effective)));
        Ok(())
    }

    /// Run cycles until `shutdown` turns true or its sender goes away, then
    /// release the hardware. Returns the final counters.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Counters, MonitorError> {
        if self.effective_timeout.is_none() {
            self.start()?;
        }

        // First tick one period out, so every sample waits before evaluation
        let period = self.config.poll_interval();
        let mut pacer = interval_at(Instant::now() + period, period);
        pacer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let summary_interval = self.config.summary_interval();
        let mut last_summary = Instant::now();

        info!(
            poll_interval_ms = %self.config.poll_interval_ms(),
            watchdog_timeout_secs = %self.watchdog_timeout().as_secs(),
            "monitor_started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.kick();
            let sample = self.sample();

            let stop = tokio::select! {
                biased;
                changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
                _ = pacer.tick() => false,
            };
            if stop {
                break;
            }

            self.evaluate(sample);
            self.metrics.record_cycle();

            if !summary_interval.is_zero() && last_summary.elapsed() >= summary_interval {
                self.report();
                last_summary = Instant::now();
            }
        }

        self.terminate();
        Ok(self.machine.counters())
    }

    fn kick(&mut self) {
        match self.watchdog.kick() {
            Ok(()) => {
                self.metrics.record_kick(Instant::now());
                self.log(MSG_WATCHDOG_KICKED);
            }
            Err(e) => {
                self.metrics.record_kick_failure();
                warn!(error = %e, "watchdog_kick_failed");
                self.log(&format!("The Watchdog kick failed: {e}"));
            }
        }
    }

    /// Read both beams; `None` if either read failed
    fn sample(&mut self) -> Option<(BeamState, BeamState)> {
        let beam1 = self.sensor.read(Diode::Beam1);
        let beam2 = self.sensor.read(Diode::Beam2);

        match (beam1, beam2) {
            (Ok(b1), Ok(b2)) => Some((b1, b2)),
            (b1, b2) => {
                self.metrics.record_read_failure();
                for (diode, err) in [(Diode::Beam1, b1.err()), (Diode::Beam2, b2.err())] {
                    if let Some(e) = err {
                        warn!(diode = %diode, error = %e, "sensor_read_failed");
                        self.log(&format!("Failed to read {diode}: {e}"));
                    }
                }
                None
            }
        }
    }

    fn evaluate(&mut self, sample: Option<(BeamState, BeamState)>) {
        let Some((beam1, beam2)) = sample else {
            trace!("cycle_skipped_on_read_failure");
            return;
        };

        for emitted in self.machine.step(beam1, beam2) {
            self.dispatch(emitted);
        }
    }

    fn dispatch(&mut self, emitted: Emitted) {
        info!(
            event = %emitted.event.as_str(),
            value = %emitted.value(),
            entries = %emitted.counters.entries,
            exits = %emitted.counters.exits,
            "crossing_event"
        );
        self.stat(emitted.event.stat_label(), emitted.value());
    }

    /// Orderly stop: terminal phase, release the sensor, disarm the watchdog
    fn terminate(&mut self) {
        info!(phase = %self.machine.phase().as_str(), "monitor_stopping");

        self.machine.terminate();
        self.sensor.release();
        self.log(MSG_GPIO_FREED);

        match self.watchdog.disarm() {
            Ok(()) => self.log(MSG_WATCHDOG_DISARMED),
            Err(e) => warn!(error = %e, "watchdog_disarm_failed"),
        }

        self.report();
    }

    fn report(&mut self) {
        let timeout = self.watchdog_timeout();
        self.metrics.report(self.machine.counters(), timeout).log();
    }

    fn log(&mut self, message: &str) {
        if let Err(e) = self.sink.log(message) {
            self.metrics.record_sink_failure();
            warn!(error = %e, "sink_log_failed");
        }
    }

    fn stat(&mut self, label: &str, value: u64) {
        if let Err(e) = self.sink.stat(label, value) {
            self.metrics.record_sink_failure();
            warn!(error = %e, label = %label, "sink_stat_failed");
        } else {
            debug!(label = %label, value = %value, "stat_written");
        }
    }

    pub fn watchdog_timeout(&self) -> Duration {
        self.effective_timeout
            .unwrap_or_else(|| Duration::from_secs(u64::from(self.config.watchdog_timeout_secs())))
    }

    pub fn counters(&self) -> Counters {
        self.machine.counters()
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::BeamState::{Broken, Clear};
    use crate::io::gpio::SensorError;
    use crate::io::sink::SinkError;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Trace = Rc<RefCell<Vec<&'static str>>>;

    /// Sensor that replays scripted samples, then reports both beams clear
    struct ScriptedSensor {
        script: VecDeque<Option<(BeamState, BeamState)>>,
        current: Option<(BeamState, BeamState)>,
        released: bool,
        trace: Trace,
    }

    impl ScriptedSensor {
        fn new(script: Vec<Option<(BeamState, BeamState)>>, trace: Trace) -> Self {
            Self { script: script.into(), current: None, released: false, trace }
        }
    }

    impl SensorPort for ScriptedSensor {
        fn read(&mut self, diode: Diode) -> Result<BeamState, SensorError> {
            if diode == Diode::Beam1 {
                self.trace.borrow_mut().push("read");
                self.current = self.script.pop_front().unwrap_or(Some((Clear, Clear)));
            }
            let (b1, b2) = self.current.ok_or(SensorError::Released)?;
            Ok(if diode == Diode::Beam1 { b1 } else { b2 })
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    struct FakeWatchdog {
        armed: Option<u32>,
        /// Overrides the timeout reported back after arming
        reported: Option<u32>,
        /// Attempts, including failed ones
        kicks: Vec<Instant>,
        fail_kicks: bool,
        disarmed: bool,
        trace: Trace,
    }

    impl FakeWatchdog {
        fn new(trace: Trace) -> Self {
            Self {
                armed: None,
                reported: None,
                kicks: Vec::new(),
                fail_kicks: false,
                disarmed: false,
                trace,
            }
        }
    }

    impl WatchdogPort for FakeWatchdog {
        fn arm(&mut self, timeout_secs: u32) -> Result<(), WatchdogError> {
            self.armed = Some(timeout_secs);
            Ok(())
        }

        fn kick(&mut self) -> Result<(), WatchdogError> {
            self.trace.borrow_mut().push("kick");
            self.kicks.push(Instant::now());
            if self.fail_kicks {
                return Err(WatchdogError::Closed);
            }
            Ok(())
        }

        fn current_timeout(&self) -> Result<u32, WatchdogError> {
            Ok(self.reported.or(self.armed).unwrap_or(0))
        }

        fn disarm(&mut self) -> Result<(), WatchdogError> {
            self.disarmed = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        logs: Vec<String>,
        stats: Vec<(String, u64)>,
        /// Every write fails, as on a full or vanished disk
        fail_writes: bool,
    }

    impl MemorySink {
        fn write_result(&self) -> Result<(), SinkError> {
            if self.fail_writes {
                return Err(SinkError::Write {
                    path: "/full/disk".into(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "no space left"),
                });
            }
            Ok(())
        }
    }

    impl EventSink for MemorySink {
        fn log(&mut self, message: &str) -> Result<(), SinkError> {
            self.write_result()?;
            self.logs.push(message.to_string());
            Ok(())
        }

        fn stat(&mut self, label: &str, value: u64) -> Result<(), SinkError> {
            self.write_result()?;
            self.stats.push((label.to_string(), value));
            Ok(())
        }
    }

    type TestLoop = MonitorLoop<ScriptedSensor, FakeWatchdog, MemorySink>;

    fn test_config() -> Config {
        Config::default()
            .with_watchdog_timeout_secs(1)
            .with_poll_interval_ms(10)
            .with_summary_interval_secs(0)
    }

    fn create_loop(script: Vec<Option<(BeamState, BeamState)>>) -> (TestLoop, Trace) {
        let trace = Trace::default();
        let sensor = ScriptedSensor::new(script, trace.clone());
        let watchdog = FakeWatchdog::new(trace.clone());
        (MonitorLoop::new(test_config(), sensor, watchdog, MemorySink::default()), trace)
    }

    async fn run_for(monitor: &mut TestLoop, duration: Duration) -> Counters {
        let (tx, rx) = watch::channel(false);
        let stopper = async move {
            tokio::time::sleep(duration).await;
            tx.send(true).unwrap();
        };
        let (_, counters) = tokio::join!(stopper, monitor.run(rx));
        counters.unwrap()
    }

    fn entry_script() -> Vec<Option<(BeamState, BeamState)>> {
        vec![
            Some((Clear, Clear)),
            Some((Broken, Clear)),
            Some((Broken, Broken)),
            Some((Clear, Broken)),
            Some((Clear, Clear)),
        ]
    }

    #[test]
    fn test_start_arms_and_logs_acquisitions() {
        let (mut monitor, _) = create_loop(vec![]);
        monitor.start().unwrap();

        assert_eq!(monitor.watchdog().armed, Some(1));
        assert_eq!(monitor.watchdog_timeout(), Duration::from_secs(1));
        assert_eq!(
            monitor.sink().logs,
            vec![MSG_GPIO_INITIALIZED, MSG_WATCHDOG_OPENED, MSG_WATCHDOG_TIMEOUT_SET]
        );
    }

    #[test]
    fn test_start_rejects_device_timeout_below_pacing() {
        let trace = Trace::default();
        let mut watchdog = FakeWatchdog::new(trace.clone());
        watchdog.reported = Some(0);
        let mut monitor = MonitorLoop::new(
            test_config(),
            ScriptedSensor::new(vec![], trace),
            watchdog,
            MemorySink::default(),
        );

        let result = monitor.start();
        assert!(matches!(
            result,
            Err(MonitorError::Watchdog(WatchdogError::TimeoutTooShort { effective: 0, .. }))
        ));
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let trace = Trace::default();
        let config = test_config().with_poll_interval_ms(0);
        let mut monitor = MonitorLoop::new(
            config,
            ScriptedSensor::new(vec![], trace.clone()),
            FakeWatchdog::new(trace),
            MemorySink::default(),
        );

        assert!(matches!(monitor.start(), Err(MonitorError::Config(_))));
        // Nothing armed when the config is rejected
        assert_eq!(monitor.watchdog().armed, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_reported_with_entry_counter() {
        let (mut monitor, _) = create_loop(entry_script());
        let counters = run_for(&mut monitor, Duration::from_millis(200)).await;

        assert_eq!(counters.entries, 1);
        assert_eq!(counters.exits, 0);
        assert_eq!(
            monitor.sink().stats,
            vec![
                ("Number of times the 1st laser was broken".to_string(), 1),
                ("Number of times the 2nd laser was broken".to_string(), 1),
                ("Number of objects that entered the room".to_string(), 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_precedes_read_every_cycle() {
        let (mut monitor, trace) = create_loop(entry_script());
        run_for(&mut monitor, Duration::from_millis(100)).await;

        let trace = trace.borrow();
        assert!(trace.len() >= 10);
        for pair in trace.chunks(2) {
            assert_eq!(pair[0], "kick");
            if pair.len() == 2 {
                assert_eq!(pair[1], "read");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_skips_step_but_keeps_kicking() {
        let mut script = entry_script();
        // Failure in the middle of a crossing holds the phase
        script.insert(3, None);
        script.insert(3, None);
        let (mut monitor, _) = create_loop(script);
        let counters = run_for(&mut monitor, Duration::from_millis(200)).await;

        assert_eq!(counters.entries, 1);
        assert_eq!(monitor.metrics().read_failures_total(), 2);
        let failure_logs =
            monitor.sink().logs.iter().filter(|l| l.starts_with("Failed to read beam1")).count();
        assert_eq!(failure_logs, 2);
        assert!(monitor.watchdog().kicks.len() as u64 > monitor.metrics().read_failures_total());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_interval_stays_below_timeout_when_sensor_dead() {
        let (mut monitor, _) = create_loop(vec![None; 500]);
        let counters = run_for(&mut monitor, Duration::from_secs(3)).await;

        assert_eq!(counters, Counters::default());
        let kicks = &monitor.watchdog().kicks;
        assert!(kicks.len() > 100);
        let timeout = monitor.watchdog_timeout();
        for gap in kicks.windows(2).map(|w| w[1] - w[0]) {
            assert!(gap < timeout, "kick gap {gap:?} reached timeout {timeout:?}");
        }
        assert!(monitor.metrics().max_kick_gap() <= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_hardware() {
        let (mut monitor, _) = create_loop(vec![Some((Clear, Clear)), Some((Broken, Clear))]);
        run_for(&mut monitor, Duration::from_millis(50)).await;

        assert_eq!(monitor.phase(), Phase::Terminated);
        assert!(monitor.sensor().released);
        assert!(monitor.watchdog().disarmed);
        let logs = &monitor.sink().logs;
        assert_eq!(logs[logs.len() - 2], MSG_GPIO_FREED);
        assert_eq!(logs[logs.len() - 1], MSG_WATCHDOG_DISARMED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_signalled_shutdown_runs_no_cycles() {
        let (mut monitor, _) = create_loop(entry_script());
        let (tx, rx) = watch::channel(true);
        let counters = monitor.run(rx).await.unwrap();
        drop(tx);

        assert_eq!(counters, Counters::default());
        assert!(monitor.watchdog().kicks.is_empty());
        assert_eq!(monitor.phase(), Phase::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_failure_does_not_stop_loop() {
        let (mut monitor, _) = create_loop(entry_script());
        monitor.watchdog.fail_kicks = true;
        let counters = run_for(&mut monitor, Duration::from_millis(200)).await;

        assert_eq!(counters.entries, 1);
        let attempts = monitor.watchdog().kicks.len() as u64;
        assert!(attempts >= monitor.metrics().cycles_total());
        assert!(monitor.metrics().cycles_total() >= 10);
        assert_eq!(monitor.metrics().kick_failures_total(), attempts);
        assert_eq!(monitor.metrics().kicks_total(), 0);

        let failure_logs = monitor
            .sink()
            .logs
            .iter()
            .filter(|l| l.starts_with("The Watchdog kick failed"))
            .count() as u64;
        assert_eq!(failure_logs, attempts);
        assert!(!monitor.sink().logs.iter().any(|l| l == MSG_WATCHDOG_KICKED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_does_not_stop_loop() {
        let (mut monitor, _) = create_loop(entry_script());
        monitor.sink.fail_writes = true;
        let counters = run_for(&mut monitor, Duration::from_millis(200)).await;

        assert_eq!(counters.entries, 1);
        assert_eq!(counters.beam1_breaks, 1);
        assert!(monitor.sink().logs.is_empty());
        assert!(monitor.sink().stats.is_empty());
        // One liveness record per kick plus three stat records
        let kicks = monitor.metrics().kicks_total();
        assert!(kicks >= 10);
        assert!(monitor.metrics().sink_failures_total() >= kicks + 3);
        assert!(monitor.watchdog().disarmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sample_waits_for_pacing_tick() {
        let (mut monitor, _) = create_loop(entry_script());
        // Stop before the first period elapses
        run_for(&mut monitor, Duration::from_millis(5)).await;

        assert_eq!(monitor.watchdog().kicks.len(), 1);
        assert_eq!(monitor.metrics().cycles_total(), 0);
        assert_eq!(monitor.phase(), Phase::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_are_one_period_apart() {
        let (mut monitor, _) = create_loop(entry_script());
        run_for(&mut monitor, Duration::from_millis(100)).await;

        let kicks = &monitor.watchdog().kicks;
        for gap in kicks.windows(2).map(|w| w[1] - w[0]) {
            assert_eq!(gap, Duration::from_millis(10));
        }
    }
}
