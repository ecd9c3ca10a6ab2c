//! Replicated object registry for Replicast.
//!
//! - **Registry** ([`Registry`], [`ReplicatedObject`]): the object table,
//!   net id allocation, spawn/destroy bookkeeping and per-object outgoing
//!   queues.
//! - **Behaviors** ([`Behavior`], [`BehaviorContext`]): the callback
//!   surface gameplay code implements.
//! - **Contracts** ([`ContractTable`], [`ContractManifest`], [`Template`]):
//!   which behaviors a contract id instantiates.
//!
//! The registry is plain synchronous data. The session actor owns it and is
//! the only code that touches it, so there are no locks here.

mod behavior;
mod contract;
mod error;
mod registry;

pub use behavior::{Behavior, BehaviorContext, SessionView};
pub use contract::{
    ContractManifest, ContractTable, ManifestItem, SpawnInfo, Template,
};
pub use error::RegistryError;
pub use registry::{ObjectInfo, Registry, ReplicatedObject, Routed};

pub use replicast_protocol::{Quat, Transform, Vec3};
pub use replicast_tick::Wait;
