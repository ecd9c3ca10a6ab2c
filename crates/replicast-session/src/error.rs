//! Error types for the session layer.

use std::path::PathBuf;

use replicast_protocol::PlayerId;

use crate::SessionState;

/// Errors that can occur while managing a session or its peers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Another session already holds the process-wide slot, or this one is
    /// already running.
    #[error("a session is already active")]
    AlreadyActive,

    /// The state machine does not allow this move.
    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// The operation needs a connected session.
    #[error("session is not connected")]
    NotConnected,

    /// No connection with that player id.
    #[error("no connection for player {0}")]
    PeerNotFound(PlayerId),

    /// The configuration file could not be read.
    #[error("cannot read session config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for a config.
    #[error("cannot parse session config: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
