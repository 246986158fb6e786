//! Photodiode sampling through the GPIO level register
//!
//! Register layout (BCM2835 family, as exposed by `/dev/gpiomem`):
//! - The device maps the GPIO block at offset 0
//! - `GPLEV0` at byte offset 0x34 holds the live level of pins 0..=31
//! - One bit per pin; whether a set bit means "beam reaches diode" depends
//!   on the wiring, so polarity is configurable

use crate::domain::types::{BeamState, Diode};
use memmap2::{MmapOptions, MmapRaw};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Byte length of the mapped GPIO register block
const GPIO_BLOCK_LEN: usize = 4096;
/// Byte offset of the pin level register for pins 0..=31
const GPLEV0_OFFSET: usize = 0x34;
/// Highest pin number covered by `GPLEV0`
const MAX_LEVEL_PIN: u8 = 31;

pub const DEFAULT_BEAM1_PIN: u8 = 4;
pub const DEFAULT_BEAM2_PIN: u8 = 17;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to open GPIO device {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to map GPIO registers from {path}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("GPIO pin {0} is outside the level register (0..=31)")]
    InvalidPin(u8),
    #[error("both beams are configured on GPIO pin {0}")]
    SharedPin(u8),
    #[error("GPIO handle has been released")]
    Released,
}

/// Source of photodiode readings
///
/// A failed read is returned as `Err`; implementations must never report a
/// failure as `Clear` or `Broken`.
pub trait SensorPort {
    fn read(&mut self, diode: Diode) -> Result<BeamState, SensorError>;

    /// Release the underlying hardware handle; later reads fail
    fn release(&mut self);
}

/// How a raw pin level maps to a beam state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// Pin reads high while the laser reaches the diode
    #[default]
    HighIsClear,
    /// Pin reads low while the laser reaches the diode
    LowIsClear,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::HighIsClear => "high-is-clear",
            Polarity::LowIsClear => "low-is-clear",
        }
    }

    #[inline]
    pub fn beam_state(&self, pin_high: bool) -> BeamState {
        match (self, pin_high) {
            (Polarity::HighIsClear, true) | (Polarity::LowIsClear, false) => BeamState::Clear,
            _ => BeamState::Broken,
        }
    }
}

impl FromStr for Polarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high-is-clear" => Ok(Polarity::HighIsClear),
            "low-is-clear" => Ok(Polarity::LowIsClear),
            other => Err(format!("unknown polarity '{other}' (expected high-is-clear or low-is-clear)")),
        }
    }
}

/// Pin assignment and polarity for the two diodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeamPins {
    pub beam1: u8,
    pub beam2: u8,
    pub polarity: Polarity,
}

impl Default for BeamPins {
    fn default() -> Self {
        Self { beam1: DEFAULT_BEAM1_PIN, beam2: DEFAULT_BEAM2_PIN, polarity: Polarity::default() }
    }
}

impl BeamPins {
    pub fn validate(&self) -> Result<(), SensorError> {
        for pin in [self.beam1, self.beam2] {
            if pin > MAX_LEVEL_PIN {
                return Err(SensorError::InvalidPin(pin));
            }
        }
        if self.beam1 == self.beam2 {
            return Err(SensorError::SharedPin(self.beam1));
        }
        Ok(())
    }

    pub fn pin(&self, diode: Diode) -> u8 {
        match diode {
            Diode::Beam1 => self.beam1,
            Diode::Beam2 => self.beam2,
        }
    }

    /// Decode one diode from a `GPLEV0` snapshot
    #[inline]
    pub fn decode(&self, level: u32, diode: Diode) -> BeamState {
        let pin_high = (level & (1u32 << self.pin(diode))) != 0;
        self.polarity.beam_state(pin_high)
    }
}

/// Sensor backed by the memory-mapped GPIO register block
pub struct GpioSensor {
    path: PathBuf,
    pins: BeamPins,
    /// `None` once released
    registers: Option<MmapRaw>,
}

impl GpioSensor {
    /// Map the GPIO block. Any failure here is fatal to the caller.
    pub fn open(path: impl AsRef<Path>, pins: BeamPins) -> Result<Self, SensorError> {
        let path = path.as_ref().to_path_buf();
        pins.validate()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| SensorError::Open { path: path.clone(), source })?;

        let registers = MmapOptions::new()
            .len(GPIO_BLOCK_LEN)
            .map_raw(&file)
            .map_err(|source| SensorError::Map { path: path.clone(), source })?;

        info!(
            device = %path.display(),
            beam1_pin = pins.beam1,
            beam2_pin = pins.beam2,
            polarity = %pins.polarity.as_str(),
            "gpio_mapped"
        );

        Ok(Self { path, pins, registers: Some(registers) })
    }

    fn read_level(&self) -> Result<u32, SensorError> {
        let registers = self.registers.as_ref().ok_or(SensorError::Released)?;
        // SAFETY: the mapping is GPIO_BLOCK_LEN bytes long and page aligned, so
        // GPLEV0_OFFSET is in bounds and 4-byte aligned. Volatile because the
        // register changes underneath us.
        let level = unsafe {
            std::ptr::read_volatile(registers.as_ptr().add(GPLEV0_OFFSET).cast::<u32>())
        };
        Ok(level)
    }
}

impl SensorPort for GpioSensor {
    fn read(&mut self, diode: Diode) -> Result<BeamState, SensorError> {
        let level = self.read_level()?;
        Ok(self.pins.decode(level, diode))
    }

    fn release(&mut self) {
        if self.registers.take().is_some() {
            debug!(device = %self.path.display(), "gpio_released");
        }
    }
}
