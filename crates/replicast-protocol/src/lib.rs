//! Wire protocol for Replicast.
//!
//! This crate defines the "language" that a server and its clients speak:
//!
//! - **Types** ([`PlayerId`], [`NetId`], [`ContractId`], [`Transform`]):
//!   the identities and spatial values carried inside messages.
//! - **Codec** ([`Message`], [`MessageKind`], [`encode`], [`decode`]):
//!   the newline-terminated text format and the typed view over it
//!   ([`Directive`]).
//! - **Framing** ([`LineAssembler`]): turns arbitrary receive chunks back
//!   into complete lines.
//! - **Numbers** ([`format_fixed`], [`format_compact`], [`parse_f32_or`]):
//!   bounded-precision decimal text used for every numeric payload.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the session
//! (routing). It doesn't know about sockets or objects.
//!
//! ```text
//! Transport (bytes) → LineAssembler (lines) → decode (Message) → Directive
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod framing;
mod numbers;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{
    ComponentMessage, CreateObject, Directive, Message, MessageKind,
    SEPARATOR, TERMINATOR, decode, decode_all, encode, encode_batch,
    encode_into,
};
pub use error::ProtocolError;
pub use framing::LineAssembler;
pub use numbers::{format_compact, format_fixed, parse_f32_or, round2};
pub use types::{ContractId, NetId, PlayerId, Quat, Role, Transform, Vec3};
