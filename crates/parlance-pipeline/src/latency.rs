//! Per-turn latency measurements.
//!
//! A turn's measurements live only as long as the turn: they are traced when
//! the reply finishes dispatching and then dropped. The numbers that matter
//! for conversational feel are time-to-first-token and time-to-first-audio.

use parlance_types::TurnId;
use tokio::time::Instant;

/// Collects the generation-side timing of one turn.
#[derive(Debug)]
pub struct TurnLatency {
    turn: TurnId,
    heard_at: Instant,
    first_token_ms: Option<u64>,
    reply_done_ms: Option<u64>,
}

impl TurnLatency {
    /// Starts the clock at the utterance boundary.
    pub fn begin(turn: TurnId) -> Self {
        Self {
            turn,
            heard_at: Instant::now(),
            first_token_ms: None,
            reply_done_ms: None,
        }
    }

    pub fn mark_first_token(&mut self) {
        if self.first_token_ms.is_none() {
            self.first_token_ms = Some(self.heard_at.elapsed().as_millis() as u64);
        }
    }

    pub fn mark_reply_done(&mut self) {
        self.reply_done_ms = Some(self.heard_at.elapsed().as_millis() as u64);
    }

    /// Emits the turn's measurements and consumes them.
    pub fn record(self) {
        tracing::info!(
            turn = self.turn,
            first_token_ms = self.first_token_ms,
            reply_done_ms = self.reply_done_ms,
            "turn latency"
        );
    }
}

/// Traces the synthesis-side timing of one turn's audio.
pub fn record_audio_dispatch(turn: TurnId, chunk_index: u64, since_text_ms: u64) {
    tracing::debug!(turn, chunk_index, since_text_ms, "audio chunk dispatched");
}
