//! Unified error type for Replicast.

use replicast_protocol::ProtocolError;
use replicast_registry::RegistryError;
use replicast_session::SessionError;
use replicast_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ReplicastError {
    /// Socket bind, connect, send or receive failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session state machine refused an operation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Object table or contract lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The session task has shut down; the handle is no longer usable.
    #[error("session has shut down")]
    Closed,
}
