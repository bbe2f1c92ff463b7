//! Pipeline tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_silence_timeout_ms() -> u64 {
    800
}

fn default_stage_timeout_ms() -> u64 {
    10_000
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_fallback_reply() -> String {
    "Sorry, I did not catch that. Could you say it again?".to_string()
}

/// Per-session pipeline configuration.
///
/// Prompt and greeting text arrive here already templated; the pipeline does
/// not know about languages or call context, only about what to say.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Local utterance-boundary fallback: with no transcript event for this
    /// long while text is pending, the utterance is finalized even without
    /// the provider's endpointing marker.
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,

    /// Deadline for each individual provider call.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,

    /// Pause before the single per-stage retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// System prompt seeding the conversation history.
    #[serde(default)]
    pub system_prompt: String,

    /// Spoken once, at the start of the first reply, after the caller first
    /// speaks. Appended to the history so generation knows it happened.
    #[serde(default)]
    pub greeting: Option<String>,

    /// Spoken when a turn's providers exhaust their retries.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl PipelineConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: default_silence_timeout_ms(),
            stage_timeout_ms: default_stage_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            system_prompt: String::new(),
            greeting: None,
            fallback_reply: default_fallback_reply(),
        }
    }
}
