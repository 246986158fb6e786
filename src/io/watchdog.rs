//! Linux hardware watchdog (`/dev/watchdog`)
//!
//! Control path:
//! - `WDIOC_SETTIMEOUT` / `WDIOC_GETTIMEOUT` take an `int` of seconds
//! - `WDIOC_KEEPALIVE` resets the countdown
//! - Writing `V` before close disarms the timer (magic close), unless the
//!   driver was built with `NOWAYOUT`

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_WATCHDOG_DEVICE: &str = "/dev/watchdog";

// asm-generic ioctl encoding
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const WATCHDOG_IOCTL_BASE: u8 = b'W';

const fn ioctl_code(direction: u32, kind: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((direction << IOC_DIRSHIFT)
        | ((kind as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

const INT_SIZE: usize = std::mem::size_of::<libc::c_int>();

const WDIOC_KEEPALIVE: libc::c_ulong = ioctl_code(IOC_READ, WATCHDOG_IOCTL_BASE, 5, INT_SIZE);
const WDIOC_SETTIMEOUT: libc::c_ulong =
    ioctl_code(IOC_READ | IOC_WRITE, WATCHDOG_IOCTL_BASE, 6, INT_SIZE);
const WDIOC_GETTIMEOUT: libc::c_ulong = ioctl_code(IOC_READ, WATCHDOG_IOCTL_BASE, 7, INT_SIZE);

const MAGIC_CLOSE: &[u8] = b"V";

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("failed to open watchdog device {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("watchdog {op} failed: {source}")]
    Ioctl {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("watchdog timeout must be between 1 and {max} seconds, got {requested}")]
    InvalidTimeout { requested: u32, max: u32 },
    #[error("watchdog timeout of {effective}s leaves no margin for a {poll_ms}ms poll interval")]
    TimeoutTooShort { effective: u32, poll_ms: u64 },
    #[error("failed to disarm watchdog: {0}")]
    Disarm(#[source] std::io::Error),
    #[error("watchdog device already closed")]
    Closed,
}

/// Hardware reset timer
///
/// If `kick()` is not called within the armed timeout, the host resets.
pub trait WatchdogPort {
    /// Set the countdown in seconds and start (or restart) it
    fn arm(&mut self, timeout_secs: u32) -> Result<(), WatchdogError>;

    /// Reset the countdown
    fn kick(&mut self) -> Result<(), WatchdogError>;

    /// Effective timeout as reported by the device, which may round the
    /// requested value
    fn current_timeout(&self) -> Result<u32, WatchdogError>;

    /// Stop the countdown before an intentional exit
    fn disarm(&mut self) -> Result<(), WatchdogError>;
}

/// Watchdog backed by the kernel watchdog character device
pub struct DeviceWatchdog {
    path: PathBuf,
    /// `None` once disarmed
    file: Option<File>,
}

impl DeviceWatchdog {
    /// Open the device. Opening alone starts the kernel countdown with the
    /// driver's default timeout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WatchdogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&path)
            .map_err(|source| WatchdogError::Open { path: path.clone(), source })?;

        info!(device = %path.display(), "watchdog_opened");
        Ok(Self { path, file: Some(file) })
    }

    fn fd(&self) -> Result<libc::c_int, WatchdogError> {
        self.file.as_ref().map(|f| f.as_raw_fd()).ok_or(WatchdogError::Closed)
    }

    fn ioctl_int(
        &self,
        op: &'static str,
        request: libc::c_ulong,
        value: &mut libc::c_int,
    ) -> Result<(), WatchdogError> {
        let fd = self.fd()?;
        // SAFETY: fd is an open watchdog descriptor and every request used here
        // reads or writes exactly one c_int through the pointer.
        let rc = unsafe { libc::ioctl(fd, request, value as *mut libc::c_int) };
        if rc < 0 {
            return Err(WatchdogError::Ioctl { op, source: std::io::Error::last_os_error() });
        }
        Ok(())
    }
}

impl WatchdogPort for DeviceWatchdog {
    fn arm(&mut self, timeout_secs: u32) -> Result<(), WatchdogError> {
        let max = libc::c_int::MAX as u32;
        if timeout_secs == 0 || timeout_secs > max {
            return Err(WatchdogError::InvalidTimeout { requested: timeout_secs, max });
        }
        let mut value = timeout_secs as libc::c_int;
        self.ioctl_int("set_timeout", WDIOC_SETTIMEOUT, &mut value)?;
        debug!(device = %self.path.display(), requested = timeout_secs, reported = value, "watchdog_armed");
        Ok(())
    }

    fn kick(&mut self) -> Result<(), WatchdogError> {
        let mut unused: libc::c_int = 0;
        self.ioctl_int("keepalive", WDIOC_KEEPALIVE, &mut unused)
    }

    fn current_timeout(&self) -> Result<u32, WatchdogError> {
        let mut value: libc::c_int = 0;
        self.ioctl_int("get_timeout", WDIOC_GETTIMEOUT, &mut value)?;
        Ok(u32::try_from(value).unwrap_or(0))
    }

    fn disarm(&mut self) -> Result<(), WatchdogError> {
        let mut file = self.file.take().ok_or(WatchdogError::Closed)?;
        file.write_all(MAGIC_CLOSE).map_err(WatchdogError::Disarm)?;
        file.flush().map_err(WatchdogError::Disarm)?;
        drop(file);
        info!(device = %self.path.display(), "watchdog_disarmed");
        Ok(())
    }
}
