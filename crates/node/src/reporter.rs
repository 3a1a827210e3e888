//! Outbound payloads: device status on `<ns>/device/info` and readings on
//! `<ns>/level`. Both are published retained so late subscribers see the
//! latest values straight away.

use std::net::{IpAddr, Ipv4Addr};

use serde::Serialize;

use crate::calibration::CalibrationState;
use crate::platform::{device_id, Platform};
use crate::sampler::ReadingSample;

/// Last-will body, published by the broker if the session drops uncleanly.
pub const DISCONNECTED_STATUS: &[u8] = br#"{"status":"disconnected"}"#;

#[derive(Debug, Serialize)]
pub struct StatusPayload {
    pub status: &'static str,
    #[serde(rename = "id(mac)")]
    pub id: String,
    #[serde(rename = "heapFragmentation")]
    pub heap_fragmentation: u8,
    #[serde(rename = "freeHeap")]
    pub free_heap: u64,
    #[serde(rename = "IP")]
    pub ip: String,
    /// `[empty, full]`
    #[serde(rename = "sensorCalibration")]
    pub sensor_calibration: [u16; 2],
}

#[derive(Debug, Serialize)]
pub struct LevelPayload {
    pub level_adc: u16,
    pub level_percentage: i32,
    pub ts: i64,
}

pub fn status_payload<P: Platform>(platform: &mut P, cal: &CalibrationState) -> StatusPayload {
    let health = platform.health();
    StatusPayload {
        status: "connected",
        id: device_id(platform.mac_address()),
        heap_fragmentation: health.heap_fragmentation,
        free_heap: health.free_heap,
        ip: platform
            .local_ip()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .to_string(),
        sensor_calibration: cal.as_pair(),
    }
}

impl From<&ReadingSample> for LevelPayload {
    fn from(sample: &ReadingSample) -> Self {
        Self {
            level_adc: sample.raw,
            level_percentage: sample.percentage,
            ts: sample.timestamp,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
