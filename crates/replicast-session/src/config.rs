//! Session configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use replicast_protocol::ContractId;
use replicast_tick::TickConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::SessionError;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for a network session.
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes:
///
/// ```json
/// { "port": 7777, "bootstrap_objects": [0] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interface a server listens on. All interfaces by default.
    pub bind_address: IpAddr,

    /// Host a client connects to when none is given.
    pub address: IpAddr,

    pub port: u16,

    /// Listen backlog, and the cap on live connections. Connections beyond
    /// it are closed right after accept.
    pub max_connections: usize,

    /// Contracts spawned world-owned when the server starts, in order.
    pub bootstrap_objects: Vec<ContractId>,

    pub tick_rate_hz: u32,

    /// Cap on ticks fired at once after a stall.
    pub max_catchup_ticks: u32,

    /// How long a leaving client waits for its Disconnect to be sent
    /// before closing anyway.
    pub leave_timeout_ms: u64,

    /// Capacity of the notification channel. Slow subscribers that fall
    /// further behind lose the oldest notifications.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9001,
            max_connections: 32,
            bootstrap_objects: Vec::new(),
            tick_rate_hz: 50,
            max_catchup_ticks: 5,
            leave_timeout_ms: 2_000,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Upper bound for `max_connections`.
    pub const MAX_CONNECTIONS: usize = 128;

    /// Parses a config from JSON and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, SessionError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.validated())
    }

    /// Reads a config file, parses and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| {
            SessionError::ConfigIo {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json_str(&json)
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// - `max_connections` clamped to `1..=`[`Self::MAX_CONNECTIONS`].
    /// - `event_capacity` at least 1.
    /// - Tick settings are clamped by [`TickConfig::validated`].
    pub fn validated(mut self) -> Self {
        if !(1..=Self::MAX_CONNECTIONS).contains(&self.max_connections) {
            let clamped = self.max_connections.clamp(1, Self::MAX_CONNECTIONS);
            warn!(
                max_connections = self.max_connections,
                clamped, "max_connections out of range, clamping"
            );
            self.max_connections = clamped;
        }
        if self.event_capacity == 0 {
            warn!("event_capacity is 0, using 1");
            self.event_capacity = 1;
        }
        let tick = self.tick_config().validated();
        self.tick_rate_hz = tick.tick_rate_hz;
        self.max_catchup_ticks = tick.max_catchup_ticks;
        self
    }

    /// The address a server binds to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// The default server address for a client.
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// `max_connections` as a listen backlog.
    pub fn backlog(&self) -> u32 {
        u32::try_from(self.max_connections).unwrap_or(u32::MAX)
    }

    pub fn leave_timeout(&self) -> Duration {
        Duration::from_millis(self.leave_timeout_ms)
    }

    /// The tick clock settings.
    pub fn tick_config(&self) -> TickConfig {
        TickConfig {
            tick_rate_hz: self.tick_rate_hz,
            max_catchup_ticks: self.max_catchup_ticks,
            ..TickConfig::default()
        }
    }
}
