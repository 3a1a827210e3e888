//! In-memory stand-ins for every hardware and network collaborator.
//!
//! Each fake is a cheap handle over shared state, so a test keeps one clone
//! to drive and inspect while the code under test owns the other.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::IpAddr;
use std::rc::Rc;

use crate::adc::{AdcError, AnalogInput};
use crate::calibration::ByteStore;
use crate::eeprom::{check_range, StoreError};
use crate::platform::{Clock, Health, Platform};
use crate::transport::{Transport, TransportError, TransportEvent, Will};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FakeClock {
    mono_ms: Rc<Cell<u64>>,
    unix: Rc<Cell<i64>>,
}

impl FakeClock {
    pub fn new(mono_ms: u64, unix: i64) -> Self {
        Self {
            mono_ms: Rc::new(Cell::new(mono_ms)),
            unix: Rc::new(Cell::new(unix)),
        }
    }

    /// Advance both clocks; wall time moves in whole seconds.
    pub fn advance(&self, ms: u64) {
        let before = self.mono_ms.get();
        let after = before + ms;
        self.mono_ms.set(after);
        let whole_secs = (after / 1000 - before / 1000) as i64;
        self.unix.set(self.unix.get() + whole_secs);
    }

    pub fn set_unix(&self, unix: i64) {
        self.unix.set(unix);
    }
}

impl Clock for FakeClock {
    fn monotonic_ms(&self) -> u64 {
        self.mono_ms.get()
    }

    fn unix_time(&self) -> i64 {
        self.unix.get()
    }
}

// ---------------------------------------------------------------------------
// Analog input
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FakeAdc {
    value: Rc<Cell<u16>>,
    fail: Rc<Cell<bool>>,
}

impl FakeAdc {
    pub fn new(value: u16) -> Self {
        Self {
            value: Rc::new(Cell::new(value)),
            fail: Rc::new(Cell::new(false)),
        }
    }

    pub fn set(&self, value: u16) {
        self.value.set(value);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.set(fail);
    }
}

impl AnalogInput for FakeAdc {
    fn read_raw(&mut self) -> Result<u16, AdcError> {
        if self.fail.get() {
            Err(AdcError::Unavailable {
                path: "fake".to_string(),
            })
        } else {
            Ok(self.value.get())
        }
    }
}

// ---------------------------------------------------------------------------
// Byte store
// ---------------------------------------------------------------------------

struct MemRegion {
    bytes: Vec<u8>,
    fail_writes: bool,
    commits: usize,
}

#[derive(Clone)]
pub struct MemStore {
    inner: Rc<RefCell<MemRegion>>,
}

impl MemStore {
    /// Zero-filled region.
    pub fn new(size: usize) -> Self {
        Self::filled(size, 0)
    }

    /// Region as it comes from the factory: all `0xFF`.
    pub fn erased(size: usize) -> Self {
        Self::filled(size, 0xFF)
    }

    fn filled(size: usize, byte: u8) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemRegion {
                bytes: vec![byte; size],
                fail_writes: false,
                commits: 0,
            })),
        }
    }

    pub fn set_bytes(&self, offset: usize, data: &[u8]) {
        self.inner.borrow_mut().bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.inner.borrow().bytes.clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.borrow_mut().fail_writes = fail;
    }

    pub fn commits(&self) -> usize {
        self.inner.borrow().commits
    }
}

impl ByteStore for MemStore {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        let region = self.inner.borrow();
        check_range(offset, buf.len(), region.bytes.len())?;
        buf.copy_from_slice(&region.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StoreError> {
        let mut region = self.inner.borrow_mut();
        if region.fail_writes {
            return Err(rejected());
        }
        check_range(offset, data.len(), region.bytes.len())?;
        region.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let mut region = self.inner.borrow_mut();
        if region.fail_writes {
            return Err(rejected());
        }
        region.commits += 1;
        Ok(())
    }
}

fn rejected() -> StoreError {
    StoreError::Io(io::Error::new(
        io::ErrorKind::PermissionDenied,
        "write rejected",
    ))
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

#[derive(Default)]
struct FakeBroker {
    /// Queue a ConnAck whenever a connection attempt starts.
    accept: bool,
    refuse: bool,
    fail_publishes: bool,
    connect_attempts: Vec<Will>,
    subscriptions: Vec<String>,
    published: Vec<Published>,
    pending: VecDeque<TransportEvent>,
    aborts: usize,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Rc<RefCell<FakeBroker>>,
}

impl FakeTransport {
    /// Transport whose attempts hang until the test pushes an event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that acknowledges every connection attempt.
    pub fn accepting() -> Self {
        let t = Self::new();
        t.accept(true);
        t
    }

    pub fn accept(&self, accept: bool) {
        self.inner.borrow_mut().accept = accept;
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.inner.borrow_mut().refuse = refuse;
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.inner.borrow_mut().fail_publishes = fail;
    }

    pub fn push_event(&self, event: TransportEvent) {
        self.inner.borrow_mut().pending.push_back(event);
    }

    pub fn deliver(&self, topic: &str, payload: &str) {
        self.push_event(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    pub fn connect_attempts(&self) -> Vec<Will> {
        self.inner.borrow().connect_attempts.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.borrow().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.inner.borrow().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn clear_published(&self) {
        self.inner.borrow_mut().published.clear();
    }

    pub fn aborts(&self) -> usize {
        self.inner.borrow().aborts
    }
}

impl Transport for FakeTransport {
    fn begin_connect(&mut self, will: &Will) -> Result<(), TransportError> {
        let mut broker = self.inner.borrow_mut();
        broker.connect_attempts.push(will.clone());
        if broker.refuse {
            return Err(TransportError::NotConnected);
        }
        if broker.accept {
            broker.pending.push_back(TransportEvent::Connected);
        }
        Ok(())
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        self.inner.borrow_mut().subscriptions.push(filter.to_string());
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        let mut broker = self.inner.borrow_mut();
        if broker.fail_publishes {
            return Err(TransportError::NotConnected);
        }
        broker.published.push(Published {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.inner.borrow_mut().pending.pop_front()
    }

    fn abort(&mut self) {
        self.inner.borrow_mut().aborts += 1;
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

pub struct FakePlatform {
    mac: [u8; 6],
    health: Health,
    ip: Option<IpAddr>,
}

impl FakePlatform {
    pub fn new(mac: [u8; 6], health: Health, ip: Option<IpAddr>) -> Self {
        Self { mac, health, ip }
    }
}

impl Platform for FakePlatform {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn health(&mut self) -> Health {
        self.health
    }

    fn local_ip(&self) -> Option<IpAddr> {
        self.ip
    }
}
