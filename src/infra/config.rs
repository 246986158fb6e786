//! Configuration loading
//!
//! The config file is positional. Lines beginning with `#` are skipped, and
//! the remaining lines that contain `=` are taken in order:
//! 1. watchdog timeout: every digit from the `=` onward, read left to right
//! 2. log file path: text after `=` with spaces and `=` removed
//! 3. stats file path: same as the log path
//!
//! Key names are not matched. Runtime settings that the file does not carry
//! (device paths, pins, pacing) come from command line flags with defaults.

use crate::io::gpio::{BeamPins, Polarity, DEFAULT_BEAM1_PIN, DEFAULT_BEAM2_PIN};
use crate::io::watchdog::DEFAULT_WATCHDOG_DEVICE;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "/home/pi/Lab4Sample.cfg";
pub const DEFAULT_GPIO_DEVICE: &str = "/dev/gpiomem";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
pub const DEFAULT_SUMMARY_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file has no {0} line")]
    MissingField(&'static str),
    #[error("watchdog timeout {0} is not a usable number of seconds")]
    InvalidTimeout(String),
    #[error("poll interval must be non-zero and below half the watchdog timeout ({timeout_secs}s), got {poll_ms}ms")]
    InvalidPollInterval { poll_ms: u64, timeout_secs: u32 },
}

/// The three values carried by the config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSettings {
    pub watchdog_timeout_secs: u32,
    pub log_file: PathBuf,
    pub stats_file: PathBuf,
}

/// Parse the positional config format
pub fn parse_positional(content: &str) -> Result<FileSettings, ConfigError> {
    let mut timeout: Option<u32> = None;
    let mut log_file: Option<String> = None;
    let mut stats_file: Option<String> = None;
    let mut field = 0usize;

    for line in content.lines() {
        if line.starts_with('#') {
            continue;
        }
        let Some(eq) = line.find('=') else {
            continue;
        };
        let value = &line[eq..];

        match field {
            0 => timeout = Some(parse_timeout_digits(value)?),
            1 => log_file = Some(strip_path(value)),
            2 => stats_file = Some(strip_path(value)),
            _ => {}
        }
        field += 1;
    }

    let watchdog_timeout_secs = timeout.ok_or(ConfigError::MissingField("watchdog timeout"))?;
    if watchdog_timeout_secs == 0 {
        return Err(ConfigError::InvalidTimeout("0".to_string()));
    }
    let log_file = log_file
        .filter(|p| !p.is_empty())
        .ok_or(ConfigError::MissingField("log file"))?;
    let stats_file = stats_file
        .filter(|p| !p.is_empty())
        .ok_or(ConfigError::MissingField("stats file"))?;

    Ok(FileSettings {
        watchdog_timeout_secs,
        log_file: PathBuf::from(log_file),
        stats_file: PathBuf::from(stats_file),
    })
}

/// Accumulate every ASCII digit in `value`, ignoring anything else
fn parse_timeout_digits(value: &str) -> Result<u32, ConfigError> {
    value
        .chars()
        .filter_map(|c| c.to_digit(10))
        .try_fold(0u32, |acc, digit| acc.checked_mul(10)?.checked_add(digit))
        .ok_or_else(|| ConfigError::InvalidTimeout(value.trim_start_matches('=').trim().to_string()))
}

fn strip_path(value: &str) -> String {
    value.chars().filter(|&c| c != ' ' && c != '=').collect()
}

/// Program name for record prefixes: the file name of the invocation path
pub fn program_name(argv0: &str) -> String {
    Path::new(argv0)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| argv0.to_string())
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    config_file: String,
    watchdog_timeout_secs: u32,
    log_file: PathBuf,
    stats_file: PathBuf,
    watchdog_device: PathBuf,
    gpio_device: PathBuf,
    beam_pins: BeamPins,
    poll_interval_ms: u64,
    summary_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_file: "default".to_string(),
            watchdog_timeout_secs: 15,
            log_file: PathBuf::from("/home/pi/log.txt"),
            stats_file: PathBuf::from("/home/pi/stats.txt"),
            watchdog_device: PathBuf::from(DEFAULT_WATCHDOG_DEVICE),
            gpio_device: PathBuf::from(DEFAULT_GPIO_DEVICE),
            beam_pins: BeamPins {
                beam1: DEFAULT_BEAM1_PIN,
                beam2: DEFAULT_BEAM2_PIN,
                polarity: Polarity::HighIsClear,
            },
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            summary_interval_secs: DEFAULT_SUMMARY_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Load the positional config file; runtime settings keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Unavailable { path: path.to_path_buf(), source })?;

        let settings = parse_positional(&content)?;

        Ok(Self {
            config_file: path.display().to_string(),
            watchdog_timeout_secs: settings.watchdog_timeout_secs,
            log_file: settings.log_file,
            stats_file: settings.stats_file,
            ..Self::default()
        })
    }

    /// Check cross-field constraints once all overrides are applied
    pub fn validate(&self) -> Result<(), ConfigError> {
        let half_timeout_ms = u64::from(self.watchdog_timeout_secs) * 1000 / 2;
        if self.poll_interval_ms == 0 || self.poll_interval_ms >= half_timeout_ms {
            return Err(ConfigError::InvalidPollInterval {
                poll_ms: self.poll_interval_ms,
                timeout_secs: self.watchdog_timeout_secs,
            });
        }
        Ok(())
    }

    pub fn with_watchdog_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.watchdog_device = path.into();
        self
    }

    pub fn with_gpio_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.gpio_device = path.into();
        self
    }

    pub fn with_beam_pins(mut self, pins: BeamPins) -> Self {
        self.beam_pins = pins;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_summary_interval_secs(mut self, secs: u64) -> Self {
        self.summary_interval_secs = secs;
        self
    }

    pub fn with_watchdog_timeout_secs(mut self, secs: u32) -> Self {
        self.watchdog_timeout_secs = secs;
        self
    }

    // Getters for all config fields
    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn watchdog_timeout_secs(&self) -> u32 {
        self.watchdog_timeout_secs
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn stats_file(&self) -> &Path {
        &self.stats_file
    }

    pub fn watchdog_device(&self) -> &Path {
        &self.watchdog_device
    }

    pub fn gpio_device(&self) -> &Path {
        &self.gpio_device
    }

    pub fn beam_pins(&self) -> BeamPins {
        self.beam_pins
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }
}
