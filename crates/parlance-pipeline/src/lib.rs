//! Per-call streaming pipeline: transcribe → generate → synthesize.
//!
//! One [`SessionPipeline`] runs per active call. Each stage is its own tokio
//! task; neighbors are joined by bounded queues so the three stages overlap
//! on different spans of the same turn. The queues are small on purpose:
//! when synthesis cannot keep up, generation suspends instead of letting
//! the backlog grow.
//!
//! Ordering rules:
//! - Turns are processed strictly in arrival order. Generation takes one
//!   utterance at a time and fully dispatches its reply to synthesis before
//!   taking the next.
//! - Barge-in is the one sanctioned break: caller speech during playback
//!   advances the turn watermark, and every stage discards work tagged with
//!   an older turn.
//!
//! Stage failures are absorbed where possible: one backoff-and-retry for a
//! transient provider error, then the turn ends with a spoken fallback reply
//! instead of the call dropping.

pub mod chunker;
pub mod config;
pub mod error;
pub mod latency;
pub mod pipeline;
pub mod transport;

mod generate;
mod synthesize;
mod transcribe;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{PipelineEnd, SessionPipeline, SynthesisPath};
pub use transport::{CallTransport, CallerSide, ChannelTransport, TransportClosed};
