//! Publish/subscribe transport port and its rumqttc adapter.
//!
//! The adapter never reconnects by itself. Each `begin_connect` builds a
//! fresh client/event-loop pair and spawns a task that polls it, forwarding
//! events over a channel until the first connection error. Connection
//! policy (when and how often to retry) belongs to [`crate::session`].

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
    Receiver, Sender,
};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Request queue depth between client handle and event loop.
const REQUEST_CAPACITY: usize = 20;

/// Events buffered between the event-loop task and the session. Inbound
/// messages beyond this are dropped.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no active connection")]
    NotConnected,
    #[error("request rejected by mqtt client: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Message the broker publishes on our behalf if we vanish uncleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker accepted the connection.
    Connected,
    /// Inbound publish on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
    /// Connection failed or dropped.
    Lost(String),
}

/// Non-blocking publish/subscribe transport. All QoS is at-least-once.
pub trait Transport {
    /// Start a connection attempt. Completion is reported later through
    /// [`Transport::poll_event`].
    fn begin_connect(&mut self, will: &Will) -> Result<(), TransportError>;
    fn subscribe(&mut self, filter: &str) -> Result<(), TransportError>;
    fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), TransportError>;
    /// Next buffered event, if any. Never waits.
    fn poll_event(&mut self) -> Option<TransportEvent>;
    /// Drop the current connection or attempt, if any.
    fn abort(&mut self);
}

// ---------------------------------------------------------------------------
// rumqttc adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
}

struct Link {
    client: AsyncClient,
    events: Receiver<TransportEvent>,
    task: JoinHandle<()>,
}

/// Must be used from within a tokio runtime: `begin_connect` spawns the
/// event-loop task.
pub struct MqttTransport {
    settings: MqttSettings,
    link: Option<Link>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            link: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.link
            .as_ref()
            .map(|l| &l.client)
            .ok_or(TransportError::NotConnected)
    }
}

/// Build the options for one connection attempt.
pub(crate) fn build_options(settings: &MqttSettings, will: &Will) -> MqttOptions {
    let mut opts = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    opts.set_keep_alive(settings.keep_alive);
    opts.set_clean_session(true);
    if let Some((user, pass)) = &settings.credentials {
        opts.set_credentials(user, pass);
    }
    opts.set_last_will(LastWill::new(
        &will.topic,
        will.payload.clone(),
        QoS::AtLeastOnce,
        will.retain,
    ));
    opts
}

/// Map one event-loop result onto a transport event. `None` means "nothing
/// the session cares about".
fn translate(result: Result<Event, rumqttc::ConnectionError>) -> Option<TransportEvent> {
    match result {
        Ok(Event::Incoming(Packet::ConnAck(_))) => Some(TransportEvent::Connected),
        Ok(Event::Incoming(Packet::Publish(p))) => Some(TransportEvent::Message {
            topic: p.topic,
            payload: p.payload.to_vec(),
        }),
        Ok(Event::Incoming(Packet::Disconnect)) => {
            Some(TransportEvent::Lost("broker sent disconnect".to_string()))
        }
        Ok(_) => None,
        Err(e) => Some(TransportEvent::Lost(e.to_string())),
    }
}

/// Queue one event for the session without waiting. Returns whether the
/// event-loop task should keep polling.
fn forward(tx: &Sender<TransportEvent>, event: TransportEvent) -> bool {
    let lost = matches!(event, TransportEvent::Lost(_));
    match tx.try_send(event) {
        Ok(()) => !lost,
        Err(TrySendError::Full(TransportEvent::Message { topic, .. })) => {
            warn!(%topic, capacity = EVENT_CAPACITY, "event queue full, message dropped");
            true
        }
        // A dropped loss still ends the task; the closed channel reports it.
        Err(TrySendError::Full(event)) => {
            warn!(?event, "event queue full, event dropped");
            !lost
        }
        // Receiver gone means the link was dropped.
        Err(TrySendError::Closed(_)) => false,
    }
}

async fn pump_event_loop(mut eventloop: EventLoop, tx: Sender<TransportEvent>) {
    loop {
        let result = eventloop.poll().await;
        trace!(?result, "mqtt event");
        let Some(event) = translate(result) else {
            continue;
        };
        if !forward(&tx, event) {
            break;
        }
    }
    debug!("mqtt event loop task finished");
}

impl Transport for MqttTransport {
    fn begin_connect(&mut self, will: &Will) -> Result<(), TransportError> {
        self.abort();

        let opts = build_options(&self.settings, will);
        let (client, eventloop) = AsyncClient::new(opts, REQUEST_CAPACITY);
        let (tx, events) = mpsc::channel(EVENT_CAPACITY);
        let task = tokio::spawn(pump_event_loop(eventloop, tx));

        debug!(
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.settings.client_id,
            "mqtt connection attempt started"
        );

        self.link = Some(Link {
            client,
            events,
            task,
        });
        Ok(())
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        self.client()?.try_subscribe(filter, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client()?
            .try_publish(topic, QoS::AtLeastOnce, retain, payload)?;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let link = self.link.as_mut()?;
        let event = match link.events.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => {
                TransportEvent::Lost("mqtt event loop stopped".to_string())
            }
        };
        if matches!(event, TransportEvent::Lost(_)) {
            self.abort();
        }
        Some(event)
    }

    fn abort(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.abort();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
