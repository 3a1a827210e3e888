//! Clock and board-identity collaborators, plus their host implementations.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Instant;

use sysinfo::{Networks, System};
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Wall-clock readings at or below this (2021-10-28T19:14:49Z) mean time has
/// not been synchronised yet.
pub const MIN_VALID_UNIX_TIME: i64 = 1_635_448_489;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock {
    /// Milliseconds since an arbitrary fixed point; never goes backwards.
    fn monotonic_ms(&self) -> u64;
    /// Seconds since the Unix epoch. Meaningless until synchronised.
    fn unix_time(&self) -> i64;

    fn wall_clock_valid(&self) -> bool {
        self.unix_time() > MIN_VALID_UNIX_TIME
    }
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn unix_time(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Health figures reported in device status. On the microcontroller these
/// are heap figures; hosts substitute memory equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Health {
    pub free_heap: u64,
    /// 0 to 100.
    pub heap_fragmentation: u8,
}

pub trait Platform {
    fn mac_address(&self) -> [u8; 6];
    fn health(&mut self) -> Health;
    /// Address this device is reachable on, if known.
    fn local_ip(&self) -> Option<IpAddr>;
}

/// 12 uppercase hex digits of the station MAC, e.g. `5CCF7F0A1B2C`.
pub fn device_id(mac: [u8; 6]) -> String {
    mac.iter().map(|b| format!("{b:02X}")).collect()
}

// ---------------------------------------------------------------------------
// Host platform
// ---------------------------------------------------------------------------

pub struct HostPlatform {
    system: System,
    mac: [u8; 6],
    /// Broker address, resolved once; used to pick the outbound interface
    /// address. `None` when the name did not resolve at startup.
    broker: Option<SocketAddr>,
}

impl HostPlatform {
    pub fn new(broker_host: &str, broker_port: u16) -> Self {
        let mac = first_hardware_mac().unwrap_or_else(|| {
            warn!("no network interface with a hardware address, using zero id");
            [0; 6]
        });
        debug!(id = %device_id(mac), "device identity resolved");

        Self {
            system: System::new(),
            mac,
            broker: resolve_broker(broker_host, broker_port),
        }
    }
}

/// Resolve the broker once. Runs during startup, before the control loop.
fn resolve_broker(host: &str, port: u16) -> Option<SocketAddr> {
    match (host, port).to_socket_addrs() {
        Ok(mut addrs) => {
            let addr = addrs.next();
            if addr.is_none() {
                warn!(host, "broker name has no addresses, IP will report 0.0.0.0");
            }
            addr
        }
        Err(e) => {
            warn!(host, "broker name did not resolve, IP will report 0.0.0.0: {e}");
            None
        }
    }
}

/// Source address the OS would use to reach `target`. Connecting a UDP
/// socket sends nothing and does no name lookup.
fn route_source_ip(target: SocketAddr) -> Option<IpAddr> {
    let any: IpAddr = match target {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let socket = UdpSocket::bind((any, 0)).ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

/// MAC of the alphabetically first interface that has a non-zero one.
fn first_hardware_mac() -> Option<[u8; 6]> {
    let networks = Networks::new_with_refreshed_list();
    let mut candidates: Vec<(&String, [u8; 6])> = networks
        .list()
        .iter()
        .map(|(name, data)| (name, data.mac_address().0))
        .filter(|(_, mac)| *mac != [0; 6])
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(b.0));
    candidates.first().map(|(_, mac)| *mac)
}

/// Percentage of `total` not covered by `available`, clamped to 0..=100.
fn used_percent(available: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let used = total.saturating_sub(available);
    // used <= total, so the quotient is <= 100.
    (u128::from(used) * 100 / u128::from(total)) as u8
}

impl Platform for HostPlatform {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn health(&mut self) -> Health {
        self.system.refresh_memory();
        let available = self.system.available_memory();
        Health {
            free_heap: available,
            heap_fragmentation: used_percent(available, self.system.total_memory()),
        }
    }

    fn local_ip(&self) -> Option<IpAddr> {
        // Re-derived each call so a changed DHCP lease shows up.
        route_source_ip(self.broker?)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
