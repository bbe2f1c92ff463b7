use thiserror::Error;

/// Errors surfaced when admitting a call. Everything after admission is
/// absorbed by the controller and reported as a `CloseReason` instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configured concurrency cap is reached. Existing sessions are
    /// unaffected; the new call is refused.
    #[error("session capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },

    /// The process is draining; no new calls are admitted.
    #[error("server is shutting down")]
    ShuttingDown,

    /// The session could not be set up at all.
    #[error("session fatal: {reason}")]
    Fatal { reason: String },
}
