//! Log and stats record output
//!
//! Record formats:
//! - log:   `<timestamp> : <program> : <message>`
//! - stats: `<timestamp> : <program> : <label>: <value>`
//!
//! Timestamps are local time as `MM-DD-YYYY  HH:MM:SS.` and every record is
//! flushed as soon as it is written.

use chrono::{DateTime, Local, TimeZone};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%m-%d-%Y  %H:%M:%S.";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open {path} for append: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for timestamped diagnostic and statistic records
pub trait EventSink {
    fn log(&mut self, message: &str) -> Result<(), SinkError>;

    fn stat(&mut self, label: &str, value: u64) -> Result<(), SinkError>;
}

/// Format a wall-clock time the way every record is stamped
pub fn format_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_log_record(timestamp: &str, program: &str, message: &str) -> String {
    format!("{timestamp} : {program} : {message}")
}

pub fn format_stat_record(timestamp: &str, program: &str, label: &str, value: u64) -> String {
    format!("{timestamp} : {program} : {label}: {value}")
}

/// One append-only file with its path kept for error reporting
struct RecordFile {
    path: PathBuf,
    file: File,
}

impl RecordFile {
    fn open(path: &Path) -> Result<Self, SinkError> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|source| SinkError::Open { path: path.to_path_buf(), source })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Open { path: path.to_path_buf(), source })?;

        Ok(Self { path: path.to_path_buf(), file })
    }

    fn write_record(&mut self, record: &str) -> Result<(), SinkError> {
        writeln!(self.file, "{record}")
            .and_then(|()| self.file.flush())
            .map_err(|source| SinkError::Write { path: self.path.clone(), source })?;
        debug!(file = %self.path.display(), bytes = record.len(), "record_written");
        Ok(())
    }
}

/// File-backed sink writing log records and stat records to separate files
pub struct FileSink {
    program: String,
    log: RecordFile,
    stats: RecordFile,
}

impl FileSink {
    /// Open (or create) both files in append mode
    pub fn open(
        log_path: impl AsRef<Path>,
        stats_path: impl AsRef<Path>,
        program: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let log = RecordFile::open(log_path.as_ref())?;
        let stats = RecordFile::open(stats_path.as_ref())?;
        let program = program.into();

        info!(
            log_file = %log.path.display(),
            stats_file = %stats.path.display(),
            program = %program,
            "sink_opened"
        );

        Ok(Self { program, log, stats })
    }
}

impl EventSink for FileSink {
    fn log(&mut self, message: &str) -> Result<(), SinkError> {
        let timestamp = format_timestamp(&Local::now());
        self.log.write_record(&format_log_record(&timestamp, &self.program, message))
    }

    fn stat(&mut self, label: &str, value: u64) -> Result<(), SinkError> {
        let timestamp = format_timestamp(&Local::now());
        self.stats.write_record(&format_stat_record(&timestamp, &self.program, label, value))
    }
}
