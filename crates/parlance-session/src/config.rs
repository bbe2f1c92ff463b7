//! Session-layer configuration.

use crate::prompts::CallContext;
use parlance_pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_warmup_timeout_ms() -> u64 {
    2_000
}

fn default_max_sessions() -> usize {
    20
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Deadline for the synthesis pre-warm; past it the session degrades to
    /// one-shot synthesis rather than keep the caller waiting.
    #[serde(default = "default_warmup_timeout_ms")]
    pub warmup_timeout_ms: u64,

    /// Concurrency cap; the call past it is refused.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Also probe the transcription provider during the warmup window.
    /// Off by default: the recognition stream open is cheap compared to the
    /// synthesis handshake.
    #[serde(default)]
    pub prewarm_transcription: bool,

    /// How long shutdown waits for sessions to drain before abandoning them.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Greeting / system-prompt context shared by every call.
    #[serde(default)]
    pub context: CallContext,

    /// Pipeline tuning. Prompt fields are overwritten per session from
    /// `context`; only the timing knobs matter here.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl SessionConfig {
    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_millis(self.warmup_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            warmup_timeout_ms: default_warmup_timeout_ms(),
            max_sessions: default_max_sessions(),
            prewarm_transcription: false,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            context: CallContext::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}
