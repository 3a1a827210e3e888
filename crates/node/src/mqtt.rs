//! Topic layout under the configured namespace, and parsing of the
//! configuration messages the node receives.

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Topic table
// ---------------------------------------------------------------------------

/// Every topic the node publishes to or listens on, derived from one
/// namespace prefix (e.g. `anasanchez/diesel`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// `<ns>/level`: readings, retained.
    pub level: String,
    /// `<ns>/device/info`: device status and last will, retained.
    pub device_info: String,
    /// `<ns>/device/config/#`: subscription filter.
    pub config_filter: String,
    /// `<ns>/device/config/calibration`
    pub config_calibration: String,
    /// `<ns>/device/config`
    pub config: String,
}

/// Inbound topics the node acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTopic {
    Calibration,
    Device,
}

impl Topics {
    pub fn new(namespace: &str) -> Self {
        Self {
            level: format!("{namespace}/level"),
            device_info: format!("{namespace}/device/info"),
            config_filter: format!("{namespace}/device/config/#"),
            config_calibration: format!("{namespace}/device/config/calibration"),
            config: format!("{namespace}/device/config"),
        }
    }

    /// Exact-match lookup of an inbound topic.
    pub fn route(&self, topic: &str) -> Option<ConfigTopic> {
        if topic == self.config_calibration {
            Some(ConfigTopic::Calibration)
        } else if topic == self.config {
            Some(ConfigTopic::Device)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Calibration command
// ---------------------------------------------------------------------------

/// Which endpoint to learn from the live sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCalibration {
    Full,
    Empty,
}

/// Parsed body of `<ns>/device/config/calibration`.
///
/// `automatic` is only ever set when neither absolute endpoint is present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationUpdate {
    pub empty: Option<u16>,
    pub full: Option<u16>,
    pub automatic: Option<AutoCalibration>,
}

impl CalibrationUpdate {
    pub fn is_empty(&self) -> bool {
        self.empty.is_none() && self.full.is_none() && self.automatic.is_none()
    }
}

/// Parse a calibration payload leniently: anything that is not a JSON object,
/// and any field with an unusable value, is ignored.
///
/// ```text
/// {"calibrationEmpty": 300}            -> empty = 300
/// {"calibrationFull": 800}             -> full = 800
/// {"automaticCalibration": "Full"}     -> automatic = Full
/// {"calibrationFull": 800,
///  "automaticCalibration": "empty"}    -> full = 800 (automatic ignored)
/// ```
///
/// Either absolute field suppresses `automaticCalibration`, so
/// `{"calibrationEmpty": 100, "automaticCalibration": "f"}` changes only the
/// empty endpoint and never captures a live reading.
pub fn parse_calibration(payload: &[u8]) -> CalibrationUpdate {
    let Some(obj) = parse_object(payload) else {
        return CalibrationUpdate::default();
    };

    let empty = raw_field(&obj, "calibrationEmpty");
    let full = raw_field(&obj, "calibrationFull");

    let automatic = if empty.is_none() && full.is_none() {
        obj.get("automaticCalibration")
            .and_then(Value::as_str)
            .and_then(parse_auto_calibration)
    } else {
        None
    };

    CalibrationUpdate {
        empty,
        full,
        automatic,
    }
}

/// `'f'`/`'F'` → full, `'e'`/`'E'` → empty; only the first character counts.
pub fn parse_auto_calibration(level: &str) -> Option<AutoCalibration> {
    match level.chars().next()? {
        'f' | 'F' => Some(AutoCalibration::Full),
        'e' | 'E' => Some(AutoCalibration::Empty),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Device config command
// ---------------------------------------------------------------------------

/// `deviceStatus` from `<ns>/device/config`, if present. Accepted but not
/// acted on.
pub fn parse_device_status(payload: &[u8]) -> Option<Value> {
    parse_object(payload)?.remove("deviceStatus")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_object(payload: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn raw_field(obj: &Map<String, Value>, key: &str) -> Option<u16> {
    obj.get(key)?
        .as_u64()
        .and_then(|v| u16::try_from(v).ok())
}

// ===========================================================================
// Tests
// ===========================================================================
