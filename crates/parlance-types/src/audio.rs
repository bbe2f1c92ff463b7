//! Audio framing types shared between the transport and the pipeline.

use serde::{Deserialize, Serialize};

/// Telephony media streams carry 8 kHz mono PCM.
pub const TELEPHONY_SAMPLE_RATE_HZ: u32 = 8000;

/// A span of raw audio bytes moving through the pipeline.
///
/// The payload is opaque to the orchestration layer; only the providers
/// interpret the encoding. Chunks are tagged with the turn they belong to so
/// downstream stages can discard output from a turn that was cancelled by
/// barge-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunk {
    /// Raw audio bytes in the transport's wire encoding.
    pub payload: Vec<u8>,
    /// Index of the conversation turn this chunk belongs to.
    pub turn: u64,
}

impl AudioChunk {
    pub fn new(payload: Vec<u8>, turn: u64) -> Self {
        Self { payload, turn }
    }

    /// Duration of this chunk in milliseconds, assuming 16-bit mono PCM at
    /// the telephony sample rate.
    pub fn approx_duration_ms(&self) -> u64 {
        let bytes_per_second = u64::from(TELEPHONY_SAMPLE_RATE_HZ) * 2;
        (self.payload.len() as u64 * 1000) / bytes_per_second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_of_one_second_of_pcm() {
        let chunk = AudioChunk::new(vec![0u8; 16000], 0);
        assert_eq!(chunk.approx_duration_ms(), 1000);
    }

    #[test]
    fn duration_of_empty_chunk_is_zero() {
        let chunk = AudioChunk::new(Vec::new(), 3);
        assert_eq!(chunk.approx_duration_ms(), 0);
    }
}
