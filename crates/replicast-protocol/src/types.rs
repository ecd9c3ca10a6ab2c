//! Identity and spatial types carried inside protocol messages.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::numbers::round2;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifies a player (a connection, from the server's point of view).
///
/// Server-assigned ids are dense and start at 0. Two negative values have
/// special meaning, see [`PlayerId::WORLD`] and [`PlayerId::UNASSIGNED`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub i32);

impl PlayerId {
    /// The authority: owner of world objects, the server's own local id,
    /// and the "no target" argument of a server-wide Disconnect.
    pub const WORLD: PlayerId = PlayerId(-1);

    /// A client that has not yet received its PlayerID message.
    pub const UNASSIGNED: PlayerId = PlayerId(-10);

    /// Returns `true` for [`PlayerId::WORLD`].
    pub fn is_world(self) -> bool {
        self == Self::WORLD
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::WORLD => f.write_str("world"),
            Self::UNASSIGNED => f.write_str("unassigned"),
            PlayerId(id) => write!(f, "P-{id}"),
        }
    }
}

/// Identifies one replicated object for the lifetime of a session.
///
/// Allocated by the server, strictly increasing, never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct NetId(pub u32);

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N-{}", self.0)
    }
}

/// Identifies which template an object is instantiated from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ContractId(pub i32);

impl ContractId {
    /// Reserved for the player-controlled object template.
    pub const PLAYER: ContractId = ContractId(-1);

    /// Returns `true` for [`ContractId::PLAYER`].
    pub fn is_player(self) -> bool {
        self == Self::PLAYER
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_player() {
            f.write_str("player")
        } else {
            write!(f, "C-{}", self.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which side of the protocol a session speaks.
///
/// The server is the authority: the only side that spawns and destroys
/// objects and the side component traffic flows out of as Update. Clients
/// send Command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Inactive,
    Server,
    Client,
}

impl Role {
    /// Returns `true` for [`Role::Server`].
    pub fn is_authority(self) -> bool {
        self == Role::Server
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Inactive => "inactive",
            Role::Server => "server",
            Role::Client => "client",
        })
    }
}

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A position or direction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Each component rounded to two decimal places, matching what a peer
    /// reconstructs from the wire.
    pub fn rounded(self) -> Self {
        Self::new(round2(self.x), round2(self.y), round2(self.z))
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Vec3) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// A rotation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Position plus rotation of a replicated object.
///
/// Defaults to the origin with identity rotation, which is also what a
/// Create message without spatial fields decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }
}
