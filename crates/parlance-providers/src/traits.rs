//! Provider service traits.
//!
//! The orchestration layer never sees a provider's wire format; it talks to
//! these traits. Each service kind has a cheap, shareable service object
//! (constructed once, held by the [`ServiceRegistry`](crate::ServiceRegistry))
//! and a per-call stream/connection object.
//!
//! Streaming connections take `&self` so one task can feed input while a
//! second task drains output from the same connection; implementations keep
//! their two halves behind separate locks.

use crate::error::ProviderError;
use async_trait::async_trait;
use parlance_types::{Message, TranscriptEvent};

/// Speech-to-text provider.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Cheap connectivity/auth check used during registry initialization.
    async fn probe(&self) -> Result<(), ProviderError>;

    /// Opens a streaming recognition session for one call.
    async fn open_stream(&self) -> Result<Box<dyn TranscriptionStream>, ProviderError>;
}

/// One call's live recognition stream.
#[async_trait]
pub trait TranscriptionStream: Send + Sync {
    /// Feeds a span of caller audio to the recognizer.
    async fn send_audio(&self, payload: &[u8]) -> Result<(), ProviderError>;

    /// Next transcript event, in emission order. `None` when the provider
    /// closes the stream.
    ///
    /// Must be cancel-safe: the pipeline races this against its silence
    /// timer, and dropping the future before it completes must not lose an
    /// event.
    async fn next_event(&self) -> Result<Option<TranscriptEvent>, ProviderError>;

    /// Tells the provider no more audio is coming.
    async fn finish(&self) -> Result<(), ProviderError>;
}

/// Language-model reply provider.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Cheap connectivity/auth check used during registry initialization.
    async fn probe(&self) -> Result<(), ProviderError>;

    /// Starts a streamed reply for the given conversation history. The last
    /// entry is the latest user utterance.
    async fn stream_reply(
        &self,
        history: &[Message],
    ) -> Result<Box<dyn ReplyStream>, ProviderError>;
}

/// A streamed language-model reply.
#[async_trait]
pub trait ReplyStream: Send {
    /// Next reply token. `None` is the end-of-reply marker.
    ///
    /// Must be cancel-safe: an abandoned poll must leave the token available
    /// for the next call.
    async fn next_token(&mut self) -> Result<Option<String>, ProviderError>;
}

/// Text-to-speech provider.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Cheap connectivity/auth check used during registry initialization.
    async fn probe(&self) -> Result<(), ProviderError>;

    /// Opens a persistent streaming connection. This is the explicit
    /// warm/open operation, independent of sending any text.
    async fn open_connection(&self) -> Result<Box<dyn SynthesisConnection>, ProviderError>;

    /// One-shot synthesis of a complete utterance. Fallback path for
    /// sessions whose warmup failed.
    async fn synthesize_once(&self, text: &str) -> Result<Vec<u8>, ProviderError>;
}

/// A persistent synthesis connection.
///
/// Audio comes back in the order text was submitted.
#[async_trait]
pub trait SynthesisConnection: Send + Sync {
    /// Submits a text span for synthesis.
    async fn send_text(&self, text: &str) -> Result<(), ProviderError>;

    /// Asks the provider to emit any buffered audio for text sent so far.
    async fn flush(&self) -> Result<(), ProviderError>;

    /// Next synthesized audio span. `None` when the connection closes.
    ///
    /// Must be cancel-safe: the reader races this against session
    /// cancellation, and an abandoned poll must not discard a chunk.
    async fn next_audio(&self) -> Result<Option<Vec<u8>>, ProviderError>;

    /// Closes the connection. Idempotent.
    async fn close(&self);
}
