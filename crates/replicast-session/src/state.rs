//! The session state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SessionError;

/// Connection state of the session.
///
/// ```text
/// client:  Idle → Connecting → Connected → Disconnecting → Idle
/// server:  Idle → Connected (listening) → Idle
/// ```
///
/// A failed connect goes `Connecting → Idle`; a client whose server drops
/// goes `Connected → Idle` without the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Connected)
                | (Connecting, Connected)
                | (Connecting, Idle)
                | (Connected, Disconnecting)
                | (Connected, Idle)
                | (Disconnecting, Idle)
        )
    }

    /// Moves to `next`, or fails with [`SessionError::InvalidTransition`].
    pub fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        tracing::debug!(from = %self, to = %next, "session state transition");
        *self = next;
        Ok(())
    }

    /// Anything but [`SessionState::Idle`].
    pub fn is_active(self) -> bool {
        self != SessionState::Idle
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        })
    }
}
