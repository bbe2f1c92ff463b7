//! Call session lifecycle vocabulary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for an active call session.
pub type SessionId = uuid::Uuid;

/// Lifecycle states of a call session.
///
/// Sessions only move forward through these states; no state is revisited.
/// `advance_to` enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session object allocated, transport handle bound.
    Created,
    /// Synthesis pre-warm in flight.
    Warming,
    /// Pipeline processing turns.
    Active,
    /// In-flight synthesis output flushing; no new turns admitted.
    Draining,
    /// All per-session resources released.
    Closed,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Warming => "warming",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }

    /// Validates a forward-only transition from `self` to `next`.
    ///
    /// Skipping states is allowed (a session that fails during warmup may go
    /// straight to `Draining`); moving backwards or standing still is not.
    pub fn advance_to(self, next: SessionState) -> Result<SessionState, StateTransitionError> {
        if next > self {
            Ok(next)
        } else {
            Err(StateTransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Attempted backwards or repeated lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session state transition: {from} -> {to}")]
pub struct StateTransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

/// Why a session ended, surfaced to the transport on close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The caller hung up or the transport dropped.
    RemoteDisconnect,
    /// Orderly process shutdown drained the session.
    ServerShutdown,
    /// Every stage exhausted its retries; the session was unusable.
    ProviderFailure,
    /// Admission refused at the session capacity limit.
    Busy,
    /// An internal invariant was violated.
    Internal(String),
}

impl CloseReason {
    pub fn code(&self) -> &str {
        match self {
            Self::RemoteDisconnect => "remote_disconnect",
            Self::ServerShutdown => "server_shutdown",
            Self::ProviderFailure => "provider_failure",
            Self::Busy => "busy",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        let s = SessionState::Created;
        let s = s.advance_to(SessionState::Warming).unwrap();
        let s = s.advance_to(SessionState::Active).unwrap();
        let s = s.advance_to(SessionState::Draining).unwrap();
        let s = s.advance_to(SessionState::Closed).unwrap();
        assert_eq!(s, SessionState::Closed);
    }

    #[test]
    fn skipping_states_is_allowed() {
        let s = SessionState::Warming;
        assert_eq!(
            s.advance_to(SessionState::Draining).unwrap(),
            SessionState::Draining
        );
    }

    #[test]
    fn backwards_and_repeated_transitions_are_rejected() {
        assert!(SessionState::Active
            .advance_to(SessionState::Warming)
            .is_err());
        assert!(SessionState::Active
            .advance_to(SessionState::Active)
            .is_err());
        assert!(SessionState::Closed
            .advance_to(SessionState::Draining)
            .is_err());
    }
}
