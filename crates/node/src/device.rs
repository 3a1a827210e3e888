//! The control loop and the device state it owns.
//!
//! Each `step` does, in order:
//!
//! 1. take and publish a reading if the sample interval has elapsed,
//! 2. start a reconnection attempt if disconnected, the wall clock is valid
//!    and the retry interval has elapsed,
//! 3. pump the session once and react to what it produced.
//!
//! Nothing in a step waits. Calibration is only written from the inbound
//! message path inside step 3, which completes before the next step reads it.

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::adc::AnalogInput;
use crate::calibration::{ByteStore, CalibrationState, CalibrationStore};
use crate::mqtt::{
    parse_calibration, parse_device_status, AutoCalibration, CalibrationUpdate, ConfigTopic,
    Topics,
};
use crate::platform::{Clock, Platform};
use crate::reporter::{status_payload, LevelPayload};
use crate::sampler::{LevelSampler, SampleError};
use crate::session::{Session, SessionEvent};
use crate::transport::Transport;

pub struct Device<S, A, T, P, C> {
    calibration: CalibrationState,
    store: CalibrationStore<S>,
    sampler: LevelSampler<A>,
    session: Session<T>,
    topics: Topics,
    platform: P,
    clock: C,
    sample_interval_ms: u64,
    last_sample_ms: u64,
    /// Set once the degenerate-calibration warning has been logged, so it is
    /// not repeated every sample.
    calibration_warned: bool,
}

impl<S, A, T, P, C> Device<S, A, T, P, C>
where
    S: ByteStore,
    A: AnalogInput,
    T: Transport,
    P: Platform,
    C: Clock,
{
    /// Loads calibration from `store`; this is the only load for the
    /// lifetime of the device.
    pub fn new(
        mut store: CalibrationStore<S>,
        sampler: LevelSampler<A>,
        session: Session<T>,
        platform: P,
        clock: C,
        sample_interval_ms: u64,
    ) -> Self {
        let calibration = store.load();
        info!(
            empty = calibration.empty_raw,
            full = calibration.full_raw,
            "sensor calibration loaded"
        );

        let topics = session.topics().clone();
        let last_sample_ms = clock.monotonic_ms();

        Self {
            calibration,
            store,
            sampler,
            session,
            topics,
            platform,
            clock,
            sample_interval_ms,
            last_sample_ms,
            calibration_warned: false,
        }
    }

    pub fn calibration(&self) -> CalibrationState {
        self.calibration
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// One pass of the control loop.
    pub fn step(&mut self) {
        let now = self.clock.monotonic_ms();

        if now.saturating_sub(self.last_sample_ms) >= self.sample_interval_ms {
            self.last_sample_ms = now;
            self.publish_reading();
        }

        if !self.session.is_connected() && self.clock.wall_clock_valid() {
            self.session.try_reconnect(now);
        }

        for event in self.session.pump(now) {
            self.on_session_event(event);
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                self.publish_status();
                self.publish_reading();
            }
            SessionEvent::Disconnected { reason } => {
                debug!(%reason, "session down, will retry");
            }
            SessionEvent::Message { topic, payload } => {
                self.handle_message(&topic, &payload);
            }
        }
    }

    /// Dispatch one inbound message, then re-announce status and level.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        match self.topics.route(topic) {
            Some(ConfigTopic::Calibration) => {
                self.apply_calibration(parse_calibration(payload));
            }
            Some(ConfigTopic::Device) => {
                if let Some(status) = parse_device_status(payload) {
                    debug!(%status, "deviceStatus received, no action defined");
                }
            }
            None => debug!(%topic, "no handler for topic"),
        }

        self.publish_status();
        self.publish_reading();
    }

    fn apply_calibration(&mut self, update: CalibrationUpdate) {
        if update.is_empty() {
            debug!("calibration message carried no usable field");
        }
        if let Some(raw) = update.empty {
            self.calibration.empty_raw = raw;
        }
        if let Some(raw) = update.full {
            self.calibration.full_raw = raw;
        }
        if let Some(which) = update.automatic {
            match self.sampler.read_raw() {
                Ok(raw) => {
                    match which {
                        AutoCalibration::Full => self.calibration.full_raw = raw,
                        AutoCalibration::Empty => self.calibration.empty_raw = raw,
                    }
                    info!(?which, raw, "endpoint learned from live reading");
                }
                Err(e) => warn!(?which, "automatic calibration skipped: {e}"),
            }
        }

        info!(
            empty = self.calibration.empty_raw,
            full = self.calibration.full_raw,
            "sensor calibration updated"
        );
        self.calibration_warned = false;

        if let Err(e) = self.store.save(&self.calibration) {
            warn!("calibration not persisted: {e}");
        }
    }

    fn publish_status(&mut self) {
        let payload = status_payload(&mut self.platform, &self.calibration);
        publish_json(&mut self.session, &self.topics.device_info, &payload);
    }

    fn publish_reading(&mut self) {
        let sample = match self
            .sampler
            .sample(&self.calibration, self.clock.unix_time())
        {
            Ok(sample) => sample,
            Err(e @ SampleError::CalibrationInvalid { .. }) => {
                if !self.calibration_warned {
                    warn!("reading not published: {e}");
                    self.calibration_warned = true;
                }
                return;
            }
            Err(e) => {
                warn!("sensor read failed: {e}");
                return;
            }
        };

        trace!(raw = sample.raw, percentage = sample.percentage, "level sampled");
        publish_json(
            &mut self.session,
            &self.topics.level,
            &LevelPayload::from(&sample),
        );
    }
}

/// Encode `payload` as JSON and publish it retained.
fn publish_json<T: Transport>(session: &mut Session<T>, topic: &str, payload: &impl Serialize) {
    match serde_json::to_vec(payload) {
        Ok(bytes) => {
            session.publish(topic, bytes, true);
        }
        Err(e) => error!(%topic, "payload encoding failed: {e}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
