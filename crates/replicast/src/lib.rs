//! # Replicast
//!
//! Authoritative client-server object replication for multiplayer games.
//!
//! One process runs a server; clients connect to it over TCP. The server
//! owns every replicated object: it spawns and destroys them, and clients
//! mirror them from `Create` and `Delete` messages. Gameplay code attaches
//! [`Behavior`]s to objects and exchanges opaque string payloads: clients
//! send Commands up, the server sends Updates down. Everything queued
//! during a tick goes out as one batch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use replicast::prelude::*;
//!
//! # async fn run() -> Result<(), ReplicastError> {
//! let contracts = ContractTable::new(|_: &SpawnInfo| Vec::<Box<dyn Behavior>>::new());
//! let server = NetworkSession::builder(contracts).exclusive(false).build()?;
//! let addr = server.start_server().await?;
//!
//! let contracts = ContractTable::new(|_: &SpawnInfo| Vec::<Box<dyn Behavior>>::new());
//! let client = NetworkSession::builder(contracts).exclusive(false).build()?;
//! client.start_client(addr).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! ```text
//! replicast (this crate)   ← session actor, NetworkSession handle
//!     ↕
//! replicast-registry       ← objects, behaviors, contracts
//! replicast-session        ← state machine, config, peers
//! replicast-tick           ← fixed-step clock, routines
//!     ↕
//! replicast-protocol       ← wire format, ids
//! replicast-transport      ← TCP
//! ```

mod actor;
mod error;
mod event;
pub mod logging;
mod session;

pub use error::ReplicastError;
pub use event::{SessionEvent, SessionStatus};
pub use session::{NetworkSession, NetworkSessionBuilder};

pub use replicast_protocol as protocol;
pub use replicast_registry as registry;
pub use replicast_session as net;
pub use replicast_tick as tick;

/// Everything a game needs to host or join a session.
pub mod prelude {
    pub use crate::{
        NetworkSession, NetworkSessionBuilder, ReplicastError, SessionEvent,
        SessionStatus,
    };
    pub use replicast_protocol::{
        ContractId, NetId, PlayerId, Quat, Role, Transform, Vec3,
        format_compact, format_fixed, parse_f32_or,
    };
    pub use replicast_registry::{
        Behavior, BehaviorContext, ContractManifest, ContractTable,
        ObjectInfo, SessionView, SpawnInfo, Template,
    };
    pub use replicast_session::{SessionConfig, SessionState};
    pub use replicast_tick::Wait;
}
