//! Session plumbing for Replicast.
//!
//! This crate owns everything about a session that is not game objects:
//!
//! - [`SessionState`]: the lifecycle state machine (idle, connecting,
//!   connected, disconnecting);
//! - [`SessionConfig`]: listen address, connection limit, tick rate and
//!   timeouts, loadable from JSON;
//! - [`PeerTable`] and [`Peer`]: live connections keyed by player id, each
//!   with its own reader and writer task reporting back as [`PeerEvent`]s.
//!
//! # How it fits in the stack
//!
//! ```text
//! replicast (above)              ← session actor drives registry + peers
//!     ↕
//! Session layer (this crate)     ← state, config, peer I/O
//!     ↕
//! Transport / Protocol (below)   ← byte streams, line framing
//! ```

mod config;
mod error;
mod peer;
mod state;

pub use config::SessionConfig;
pub use error::SessionError;
pub use peer::{Frame, Peer, PeerEvent, PeerTable};
pub use replicast_protocol::Role;
pub use state::SessionState;
