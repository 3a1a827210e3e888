//! Sensor calibration endpoints and their persistence in the small
//! fixed-layout byte region (EEPROM-style) reserved at startup.
//!
//! Layout (little-endian):
//!
//! ```text
//! offset 0..2  empty_raw  (u16)
//! offset 2..4  full_raw   (u16)
//! offset 4..10 reserved
//! ```
//!
//! Each field is written independently at its own offset, so an interrupted
//! save leaves at most one endpoint stale.

use tracing::warn;

use crate::eeprom::StoreError;

/// Total size of the persistent region reserved for the device.
pub const REGION_SIZE: usize = 10;

/// Offset of the empty-tank raw value.
pub const EMPTY_OFFSET: usize = 0;

/// Offset of the full-tank raw value.
pub const FULL_OFFSET: usize = 2;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The two raw ADC values that define 0 % and 100 % tank level.
///
/// No ordering is enforced: `full_raw < empty_raw` gives an inverted mapping,
/// which is accepted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationState {
    pub empty_raw: u16,
    pub full_raw: u16,
}

impl CalibrationState {
    pub fn new(empty_raw: u16, full_raw: u16) -> Self {
        Self {
            empty_raw,
            full_raw,
        }
    }

    /// `[empty, full]`, the order used on the wire.
    pub fn as_pair(&self) -> [u16; 2] {
        [self.empty_raw, self.full_raw]
    }
}

// ---------------------------------------------------------------------------
// Byte store port
// ---------------------------------------------------------------------------

/// A small persistent byte region addressed by offset.
pub trait ByteStore {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StoreError>;
    /// Flush pending writes to the backing medium.
    fn commit(&mut self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Calibration store
// ---------------------------------------------------------------------------

pub struct CalibrationStore<S> {
    store: S,
}

impl<S: ByteStore> CalibrationStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Read both endpoints. Stored values are not validated; an erased
    /// region yields whatever bytes it holds (typically `0xFFFF`).
    ///
    /// A field that cannot be read is logged and loaded as 0.
    pub fn load(&mut self) -> CalibrationState {
        CalibrationState::new(
            self.read_field(EMPTY_OFFSET, "empty"),
            self.read_field(FULL_OFFSET, "full"),
        )
    }

    /// Write both endpoints and commit.
    ///
    /// Both fields are attempted even if the first write fails; the first
    /// error encountered is returned.
    pub fn save(&mut self, state: &CalibrationState) -> Result<(), StoreError> {
        let empty = self
            .store
            .write(EMPTY_OFFSET, &state.empty_raw.to_le_bytes());
        let full = self.store.write(FULL_OFFSET, &state.full_raw.to_le_bytes());
        let commit = self.store.commit();
        empty.and(full).and(commit)
    }

    fn read_field(&mut self, offset: usize, name: &str) -> u16 {
        let mut buf = [0u8; 2];
        match self.store.read(offset, &mut buf) {
            Ok(()) => u16::from_le_bytes(buf),
            Err(e) => {
                warn!(field = name, offset, "calibration read failed: {e}");
                0
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
