//! Analog input port and the Linux IIO adapter.
//!
//! On the target board the fuel sender sits on the single 10-bit ADC pin
//! (0..=1023). On a Linux host the same value comes from an industrial-I/O
//! sysfs attribute such as
//! `/sys/bus/iio/devices/iio:device0/in_voltage0_raw`.

use std::fs;
use std::io;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

/// Highest value the 10-bit ADC can return.
pub const ADC_MAX: u16 = 1023;

#[derive(Debug, Error)]
pub enum AdcError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid raw value {value:?}: {source}")]
    Parse {
        value: String,
        #[source]
        source: ParseIntError,
    },
    /// The channel attribute does not exist, e.g. the IIO driver is not
    /// loaded.
    #[error("analog input {path} not present")]
    Unavailable { path: String },
}

/// A source of raw, unconverted analog samples.
pub trait AnalogInput {
    fn read_raw(&mut self) -> Result<u16, AdcError>;
}

// ---------------------------------------------------------------------------
// IIO sysfs adapter
// ---------------------------------------------------------------------------

/// Reads one channel through a Linux IIO `in_voltageN_raw` attribute.
pub struct IioAdc {
    path: PathBuf,
}

impl IioAdc {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "iio analog input configured");
        Self { path }
    }
}

impl AnalogInput for IioAdc {
    fn read_raw(&mut self) -> Result<u16, AdcError> {
        let text = fs::read_to_string(&self.path).map_err(|source| {
            let path = self.path.display().to_string();
            if source.kind() == io::ErrorKind::NotFound {
                AdcError::Unavailable { path }
            } else {
                AdcError::Read { path, source }
            }
        })?;
        parse_raw(&text)
    }
}

/// Parse a sysfs attribute value (decimal, surrounding whitespace allowed).
fn parse_raw(text: &str) -> Result<u16, AdcError> {
    let value = text.trim();
    value.parse().map_err(|source| AdcError::Parse {
        value: value.to_string(),
        source,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
