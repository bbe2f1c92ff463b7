//! Provider configuration and fingerprints.
//!
//! Each provider section carries credentials, endpoints, and model/voice
//! identifiers. A section's fingerprint (SHA-256 over the identifying
//! fields) names the configuration a handle was built from; credential
//! rotation produces a new fingerprint and is an explicit administrative
//! re-initialization, never something call traffic triggers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

fn default_temperature() -> f32 {
    0.4
}

/// Transcription provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    /// REST endpoint used for connectivity probes.
    pub endpoint: String,
    /// Streaming recognition endpoint (WebSocket).
    pub stream_endpoint: String,
    pub model: String,
    /// BCP-47 locale hint sent with the stream.
    #[serde(default)]
    pub locale: Option<String>,
}

/// Generation provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// Synthesis provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    /// REST endpoint used for probes and one-shot synthesis.
    pub endpoint: String,
    /// Persistent streaming endpoint (WebSocket).
    pub stream_endpoint: String,
    pub voice_id: String,
}

/// All three provider sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub transcription: TranscriptionConfig,
    pub generation: GenerationConfig,
    pub synthesis: SynthesisConfig,
}

fn fingerprint_of(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

impl TranscriptionConfig {
    /// Stable identifier for this configuration: credentials + model.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&[
            "transcription",
            &self.api_key,
            &self.endpoint,
            &self.model,
            self.locale.as_deref().unwrap_or(""),
        ])
    }
}

impl GenerationConfig {
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&["generation", &self.api_key, &self.endpoint, &self.model])
    }
}

impl SynthesisConfig {
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&["synthesis", &self.api_key, &self.endpoint, &self.voice_id])
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("stream_endpoint", &self.stream_endpoint)
            .field("model", &self.model)
            .field("locale", &self.locale)
            .finish()
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("stream_endpoint", &self.stream_endpoint)
            .field("voice_id", &self.voice_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthesis_config(voice: &str) -> SynthesisConfig {
        SynthesisConfig {
            api_key: "key".to_string(),
            endpoint: "https://tts.example".to_string(),
            stream_endpoint: "wss://tts.example/stream".to_string(),
            voice_id: voice.to_string(),
        }
    }

    #[test]
    fn fingerprint_changes_with_voice_id() {
        let a = synthesis_config("aria").fingerprint();
        let b = synthesis_config("kai").fingerprint();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(
            synthesis_config("aria").fingerprint(),
            synthesis_config("aria").fingerprint()
        );
    }

    #[test]
    fn debug_redacts_credentials() {
        let debug = format!("{:?}", synthesis_config("aria"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("\"key\""));
    }
}
