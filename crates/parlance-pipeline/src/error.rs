use parlance_providers::ProviderError;
use thiserror::Error;

/// Errors that make a pipeline stage — and therefore the session — unusable.
///
/// Everything recoverable (transient provider hiccups, a single bad turn) is
/// absorbed inside the stages; what escapes here ends the call.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A provider error that survived the retry policy.
    #[error("{stage} stage exhausted retries: {source}")]
    RetriesExhausted {
        stage: &'static str,
        source: ProviderError,
    },

    /// A provider call that is neither transient nor retryable.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An inter-stage queue closed while the producer still had work. Only
    /// happens when a neighbor stage died first.
    #[error("pipeline queue closed by {stage} stage")]
    QueueClosed { stage: &'static str },
}
