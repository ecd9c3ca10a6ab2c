//! Notifications and status snapshots.

use std::net::SocketAddr;

use replicast_protocol::{PlayerId, Role};
use replicast_session::SessionState;
use serde::Serialize;

/// Fired to every subscriber of [`NetworkSession::events`].
///
/// [`NetworkSession::events`]: crate::NetworkSession::events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session started, as server or client.
    Connected(Role),
    /// The session is back to idle.
    Disconnected,
    /// Server: a client was accepted and has its player object.
    ClientConnected(PlayerId),
    /// Server: a client left or was evicted; its objects are gone.
    ClientDisconnected(PlayerId),
    /// One fixed step of the replication clock.
    Tick(u64),
}

/// A point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub role: Role,
    pub state: SessionState,
    pub local_player: PlayerId,
    pub connection_count: usize,
    pub object_count: usize,
    /// Server only: where new clients connect, while still accepting.
    pub listening: Option<SocketAddr>,
    pub tick: u64,
}
