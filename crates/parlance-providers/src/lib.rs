//! External service clients and their lifecycle for the Parlance platform.
//!
//! A call session depends on three expensive, stateful external services:
//! transcription (speech-to-text), generation (language model), and synthesis
//! (text-to-speech). This crate owns their lifecycle:
//!
//! - [`ServiceRegistry`] builds one long-lived handle per service kind at
//!   process start, connectivity-checks each one eagerly, and is immutable
//!   afterwards. Per-call latency never includes service construction cost.
//! - [`ConnectionWarmer`] opens the persistent synthesis connection during
//!   the call-setup window, before any caller audio arrives, so the
//!   multi-hundred-millisecond handshake never lands on a conversational
//!   turn.
//! - The provider traits ([`TranscriptionService`], [`GenerationService`],
//!   [`SynthesisService`]) keep the wire formats out of the orchestration
//!   layer; [`http`] carries the real network clients and [`scripted`]
//!   carries in-process providers for tests and local development.

pub mod config;
pub mod error;
pub mod http;
pub mod registry;
pub mod scripted;
pub mod traits;
pub mod warmer;

pub use config::{GenerationConfig, ProvidersConfig, SynthesisConfig, TranscriptionConfig};
pub use error::ProviderError;
pub use registry::{ServiceClient, ServiceHandle, ServiceRegistry};
pub use traits::{
    GenerationService, ReplyStream, SynthesisConnection, SynthesisService, TranscriptionService,
    TranscriptionStream,
};
pub use warmer::{ConnectionWarmer, WarmedConnection};
