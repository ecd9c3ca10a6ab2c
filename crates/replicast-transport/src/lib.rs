//! Transport abstraction layer for Replicast.
//!
//! Provides the [`Transport`] and [`Connection`] traits over a reliable,
//! ordered byte stream, plus the TCP implementation used by the session
//! layer ([`TcpTransport`], [`TcpConnection`]).
//!
//! The transport knows nothing about messages. A [`Connection::recv`] call
//! returns whatever bytes the socket had ready, at most
//! [`RECV_BUFFER_SIZE`] of them, so message boundaries are the caller's
//! problem (see `replicast_protocol::LineAssembler`).

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{RECV_BUFFER_SIZE, TcpConnection, TcpTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// Opaque identifier for a transport connection.
///
/// This is a process-wide counter used for logging. It is unrelated to the
/// player id the session layer assigns to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// The address the transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// A single connection that can send and receive bytes.
///
/// Methods take `&self` so that one task can sit in [`recv`](Self::recv)
/// while another task sends on the same connection.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Writes all of `data` to the remote peer, in order.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next chunk of bytes from the remote peer.
    ///
    /// Returns `Ok(None)` when the peer has closed its side.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Shuts down the sending side of the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the remote address.
    fn peer_addr(&self) -> SocketAddr;
}
