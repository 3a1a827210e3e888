//! Messaging session: one broker connection, its reconnection policy and the
//! inbound message queue.
//!
//! ## Connection state machine
//!
//! ```text
//!              try_reconnect (rate limited)
//! Disconnected ────────────────────────────▶ Connecting
//!      ▲  ▲                                      │
//!      │  └──[lost / connect timeout]────────────┤
//!      │                                     [ConnAck]
//!      │                                         ▼
//!      └──────────────[lost]──────────────── Connected
//! ```
//!
//! Every call here returns immediately; progress is observed by `pump`, which
//! the control loop calls once per iteration.

use tracing::{debug, info, trace, warn};

use crate::mqtt::Topics;
use crate::reporter::DISCONNECTED_STATUS;
use crate::transport::{Transport, TransportEvent, Will};

/// Upper bound on transport events handled by one `pump`.
const MAX_EVENTS_PER_PUMP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { since_ms: u64 },
    Connected,
}

/// What the control loop needs to react to after a pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session established and subscribed; announce the device.
    Connected,
    Disconnected { reason: String },
    Message { topic: String, payload: Vec<u8> },
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    /// Minimum spacing between the starts of two connection attempts.
    pub retry_interval_ms: u64,
    /// How long an attempt may stay in `Connecting`.
    pub connect_timeout_ms: u64,
}

pub struct Session<T> {
    transport: T,
    topics: Topics,
    timing: SessionTiming,
    state: ConnectionState,
    last_attempt_ms: Option<u64>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, topics: Topics, timing: SessionTiming) -> Self {
        Self {
            transport,
            topics,
            timing,
            state: ConnectionState::Disconnected,
            last_attempt_ms: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Last will registered with every connection attempt.
    pub fn will(&self) -> Will {
        Will {
            topic: self.topics.device_info.clone(),
            payload: DISCONNECTED_STATUS.to_vec(),
            retain: true,
        }
    }

    /// Whether a new attempt may start at `now_ms`.
    pub fn reconnect_due(&self, now_ms: u64) -> bool {
        self.state == ConnectionState::Disconnected
            && self
                .last_attempt_ms
                .map_or(true, |t| now_ms.saturating_sub(t) >= self.timing.retry_interval_ms)
    }

    /// Start a connection attempt if one is due. Returns whether an attempt
    /// was started.
    pub fn try_reconnect(&mut self, now_ms: u64) -> bool {
        if !self.reconnect_due(now_ms) {
            return false;
        }
        self.last_attempt_ms = Some(now_ms);

        match self.transport.begin_connect(&self.will()) {
            Ok(()) => {
                debug!("mqtt connecting");
                self.state = ConnectionState::Connecting { since_ms: now_ms };
                true
            }
            Err(e) => {
                warn!("mqtt connection error: {e}");
                false
            }
        }
    }

    /// Process buffered transport events and connection timeouts.
    pub fn pump(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        let mut out = Vec::new();

        if let ConnectionState::Connecting { since_ms } = self.state {
            if now_ms.saturating_sub(since_ms) >= self.timing.connect_timeout_ms {
                self.transport.abort();
                self.state = ConnectionState::Disconnected;
                warn!(
                    timeout_ms = self.timing.connect_timeout_ms,
                    "mqtt connection error: no connack"
                );
                out.push(SessionEvent::Disconnected {
                    reason: "connect timed out".to_string(),
                });
                return out;
            }
        }

        for _ in 0..MAX_EVENTS_PER_PUMP {
            let Some(event) = self.transport.poll_event() else {
                break;
            };
            if let Some(ev) = self.on_transport_event(event) {
                out.push(ev);
            }
        }
        out
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Option<SessionEvent> {
        match event {
            TransportEvent::Connected => {
                if self.state == ConnectionState::Connected {
                    return None;
                }
                self.state = ConnectionState::Connected;
                self.last_attempt_ms = None;
                info!("mqtt connected");

                if let Err(e) = self.transport.subscribe(&self.topics.config_filter) {
                    warn!(filter = %self.topics.config_filter, "subscribe failed: {e}");
                }
                Some(SessionEvent::Connected)
            }
            TransportEvent::Lost(reason) => {
                if self.state == ConnectionState::Disconnected {
                    return None;
                }
                if self.state == ConnectionState::Connected {
                    warn!(%reason, "mqtt disconnected");
                } else {
                    warn!(%reason, "mqtt connection error");
                }
                self.state = ConnectionState::Disconnected;
                Some(SessionEvent::Disconnected { reason })
            }
            TransportEvent::Message { topic, payload } => {
                debug!(
                    %topic,
                    payload = %String::from_utf8_lossy(&payload),
                    "message arrived"
                );
                Some(SessionEvent::Message { topic, payload })
            }
        }
    }

    /// Publish at-least-once. Skipped unless connected. Returns whether the
    /// message was handed to the transport.
    pub fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool) -> bool {
        if !self.is_connected() {
            trace!(%topic, "not connected, publish skipped");
            return false;
        }
        match self.transport.publish(topic, payload, retain) {
            Ok(()) => true,
            Err(e) => {
                warn!(%topic, "publish failed: {e}");
                false
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
