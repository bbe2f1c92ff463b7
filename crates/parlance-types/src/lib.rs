//! Shared types and constants for the Parlance voice-call platform.
//!
//! This crate provides the foundational vocabulary used across all Parlance
//! crates: external service kinds, session lifecycle states, conversation
//! messages, transcript events, and audio framing types.
//!
//! No crate in the workspace depends on anything *except* `parlance-types`
//! for cross-cutting type definitions. This keeps the dependency graph clean
//! and prevents circular dependencies.

pub mod audio;
pub mod session;
pub mod transcript;

pub use audio::{AudioChunk, TELEPHONY_SAMPLE_RATE_HZ};
pub use session::{CloseReason, SessionId, SessionState, StateTransitionError};
pub use transcript::{Message, Role, TranscriptEvent, TurnId};

use serde::{Deserialize, Serialize};

/// The kinds of external services a call session depends on.
///
/// Exactly one long-lived handle per kind exists process-wide; handles are
/// created at startup and shared read-only by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Speech-to-text transcription.
    Transcription,
    /// Language-model reply generation.
    Generation,
    /// Text-to-speech synthesis.
    Synthesis,
}

impl ServiceKind {
    /// Returns the string label for this kind, used in logs and config keys.
    pub fn label(self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Generation => "generation",
            Self::Synthesis => "synthesis",
        }
    }

    /// All service kinds, in pipeline order.
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::Transcription,
        ServiceKind::Generation,
        ServiceKind::Synthesis,
    ];
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Connection state of an external service handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Constructed but never connectivity-checked.
    Uninitialized,
    /// Connectivity check passed; safe to use.
    Ready,
    /// Connectivity check failed.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_kind_labels_are_stable() {
        assert_eq!(ServiceKind::Transcription.label(), "transcription");
        assert_eq!(ServiceKind::Generation.label(), "generation");
        assert_eq!(ServiceKind::Synthesis.label(), "synthesis");
    }

    #[test]
    fn service_kind_all_is_pipeline_ordered() {
        assert_eq!(
            ServiceKind::ALL,
            [
                ServiceKind::Transcription,
                ServiceKind::Generation,
                ServiceKind::Synthesis
            ]
        );
    }
}
