use parlance_types::ServiceKind;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by provider clients and their lifecycle management.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A connectivity check failed during registry initialization. Fatal:
    /// the process must not accept calls.
    #[error("initialization failed for {kind} provider: {message}")]
    Initialization { kind: ServiceKind, message: String },

    /// The registry holds no handle for the requested kind. This is a
    /// caller-programming error: `get` was used before initialization
    /// completed for that kind.
    #[error("no initialized handle for {0} service")]
    NotReady(ServiceKind),

    /// The synthesis pre-warm did not produce a live connection within its
    /// deadline. Recoverable: the session degrades to one-shot synthesis.
    #[error("synthesis warmup timed out after {0:?}")]
    WarmupTimeout(Duration),

    /// The synthesis provider refused the warm/open request. Recoverable:
    /// the session degrades to one-shot synthesis.
    #[error("synthesis warmup rejected: {0}")]
    WarmupRejected(String),

    /// A transient failure (network hiccup, 5xx, dropped stream). Retried
    /// once with backoff by the stage that hit it.
    #[error("transient {kind} provider error: {message}")]
    Transient { kind: ServiceKind, message: String },

    /// The provider rejected the request outright (auth, quota, bad model
    /// id). Not retried.
    #[error("{kind} provider rejected request: {message}")]
    Rejected { kind: ServiceKind, message: String },
}

impl ProviderError {
    pub fn transient(kind: ServiceKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(kind: ServiceKind, message: impl Into<String>) -> Self {
        Self::Rejected {
            kind,
            message: message.into(),
        }
    }

    /// Whether a single backoff-and-retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Maps a failed HTTP round-trip into the transient/rejected split used
    /// by the retry policy.
    pub fn from_status(kind: ServiceKind, status: reqwest::StatusCode, body: String) -> Self {
        if status.is_server_error() {
            Self::transient(kind, format!("{status}: {body}"))
        } else {
            Self::rejected(kind, format!("{status}: {body}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let transient = ProviderError::from_status(
            ServiceKind::Generation,
            reqwest::StatusCode::BAD_GATEWAY,
            String::new(),
        );
        assert!(transient.is_transient());

        let rejected = ProviderError::from_status(
            ServiceKind::Generation,
            reqwest::StatusCode::UNAUTHORIZED,
            String::new(),
        );
        assert!(!rejected.is_transient());
    }
}
