//! Beam counter - two-beam doorway crossing counter
//!
//! Samples a pair of photodiodes through the GPIO register block, counts
//! confirmed entries and exits, and keeps the hardware watchdog fed so a hung
//! process resets the board.
//!
//! Module structure:
//! - `domain/` - Beam, phase, event and counter types
//! - `io/` - GPIO sensor, watchdog device, record files
//! - `services/` - Crossing state machine and monitor loop
//! - `infra/` - Config, metrics, errors, signal handling

use anyhow::Context;
use beam_counter::infra::config::{
    program_name, DEFAULT_CONFIG_FILE, DEFAULT_GPIO_DEVICE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_SUMMARY_INTERVAL_SECS,
};
use beam_counter::infra::{shutdown, Config};
use beam_counter::io::gpio::{DEFAULT_BEAM1_PIN, DEFAULT_BEAM2_PIN};
use beam_counter::io::watchdog::DEFAULT_WATCHDOG_DEVICE;
use beam_counter::io::{BeamPins, DeviceWatchdog, EventSink, FileSink, GpioSensor, Polarity};
use beam_counter::services::MonitorLoop;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Beam counter - doorway crossing counter with hardware watchdog
#[derive(Parser, Debug)]
#[command(name = "beam-counter", version, about)]
struct Args {
    /// Positional config file (watchdog timeout, log file, stats file)
    #[arg(short, long, env = "CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Watchdog character device
    #[arg(long, default_value = DEFAULT_WATCHDOG_DEVICE)]
    watchdog_device: PathBuf,

    /// GPIO register device
    #[arg(long, default_value = DEFAULT_GPIO_DEVICE)]
    gpio_device: PathBuf,

    /// BCM pin of the outer beam
    #[arg(long, default_value_t = DEFAULT_BEAM1_PIN)]
    beam1_pin: u8,

    /// BCM pin of the inner beam
    #[arg(long, default_value_t = DEFAULT_BEAM2_PIN)]
    beam2_pin: u8,

    /// Pin level that means the beam is intact (high-is-clear or low-is-clear)
    #[arg(long, default_value = "high-is-clear")]
    polarity: Polarity,

    /// Pause between sampling the beams and evaluating them
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    /// Period of the health summary in the diagnostic log (0 disables)
    #[arg(long, default_value_t = DEFAULT_SUMMARY_INTERVAL_SECS)]
    summary_interval_secs: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-record visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "beam-counter starting");

    let args = Args::parse();
    let program = std::env::args()
        .next()
        .map(|argv0| program_name(&argv0))
        .unwrap_or_else(|| "beam-counter".to_string());

    let config = Config::from_file(&args.config)
        .with_context(|| format!("unable to load configuration from {}", args.config.display()))?
        .with_watchdog_device(args.watchdog_device)
        .with_gpio_device(args.gpio_device)
        .with_beam_pins(BeamPins {
            beam1: args.beam1_pin,
            beam2: args.beam2_pin,
            polarity: args.polarity,
        })
        .with_poll_interval_ms(args.poll_interval_ms)
        .with_summary_interval_secs(args.summary_interval_secs);
    config.validate().context("invalid configuration")?;

    info!(
        config_file = %config.config_file(),
        watchdog_timeout_secs = %config.watchdog_timeout_secs(),
        log_file = %config.log_file().display(),
        stats_file = %config.stats_file().display(),
        watchdog_device = %config.watchdog_device().display(),
        gpio_device = %config.gpio_device().display(),
        beam1_pin = %config.beam_pins().beam1,
        beam2_pin = %config.beam_pins().beam2,
        polarity = %config.beam_pins().polarity.as_str(),
        poll_interval_ms = %config.poll_interval_ms(),
        "config_loaded"
    );

    let mut sink = FileSink::open(config.log_file(), config.stats_file(), program)
        .context("unable to open record files")?;

    let sensor = match GpioSensor::open(config.gpio_device(), config.beam_pins()) {
        Ok(sensor) => sensor,
        Err(e) => {
            error!(error = %e, "gpio_init_failed");
            record_fatal(&mut sink, &format!("Failed to initialize the GPIO pins: {e}"));
            return Err(e).context("unable to initialize the GPIO pins");
        }
    };

    // Opening the device starts the countdown; signals must already be ours
    let shutdown_rx = shutdown::install().context("unable to install signal handlers")?;

    let watchdog = match DeviceWatchdog::open(config.watchdog_device()) {
        Ok(watchdog) => watchdog,
        Err(e) => {
            error!(error = %e, "watchdog_init_failed");
            record_fatal(&mut sink, &format!("Failed to open the Watchdog file: {e}"));
            return Err(e).context("unable to open the watchdog device");
        }
    };

    let mut monitor = MonitorLoop::new(config, sensor, watchdog, sink);
    monitor.start().context("unable to arm the watchdog")?;

    let counters = monitor.run(shutdown_rx).await?;

    info!(
        entries = %counters.entries,
        exits = %counters.exits,
        beam1_breaks = %counters.beam1_breaks,
        beam2_breaks = %counters.beam2_breaks,
        "beam-counter shutdown complete"
    );
    Ok(())
}

/// Write the reason for a fatal exit to the log file; returns whether it landed
fn record_fatal(sink: &mut impl EventSink, message: &str) -> bool {
    match sink.log(message) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, message = %message, "fatal_record_not_written");
            false
        }
    }
}
