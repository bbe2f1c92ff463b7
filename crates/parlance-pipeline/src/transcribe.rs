//! Transcribe stage: caller audio in, finalized utterances out.
//!
//! A feeder task pumps transport audio into the provider stream while this
//! stage's main loop consumes transcript events. An utterance is finalized
//! on the provider's endpointing marker, or after a local silence timeout
//! when text is pending. `SpeechStart` is the only barge-in trigger: it
//! advances the turn watermark before the new utterance is even finalized,
//! so downstream stages stop spending work on the stale turn.

use crate::error::PipelineError;
use crate::pipeline::Utterance;
use crate::transport::CallTransport;
use parlance_providers::{ProviderError, TranscriptionStream};
use parlance_types::{TranscriptEvent, TurnId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub(crate) struct TranscribeArgs {
    pub stream: Arc<dyn TranscriptionStream>,
    pub transport: Arc<dyn CallTransport>,
    pub utterance_tx: mpsc::Sender<Utterance>,
    pub watermark: watch::Sender<TurnId>,
    pub silence_timeout: Duration,
    pub retry_backoff: Duration,
    pub cancel: CancellationToken,
}

/// How the transcribe stage ended.
pub(crate) enum TranscribeEnd {
    /// Caller audio or the recognition stream ended; drain downstream.
    InputEnded,
    Cancelled,
    Failed(PipelineError),
}

pub(crate) async fn run(args: TranscribeArgs) -> TranscribeEnd {
    let feeder = spawn_feeder(
        Arc::clone(&args.stream),
        Arc::clone(&args.transport),
        args.cancel.clone(),
    );

    let end = read_events(&args).await;
    feeder.abort();
    end
}

/// Pumps caller audio into the recognition stream until disconnect.
fn spawn_feeder(
    stream: Arc<dyn TranscriptionStream>,
    transport: Arc<dyn CallTransport>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = transport.next_audio() => chunk,
            };
            match chunk {
                Some(payload) => {
                    if let Err(err) = stream.send_audio(&payload).await {
                        // The reader loop sees the same broken stream and
                        // applies the retry policy; just stop feeding.
                        tracing::warn!(error = %err, "audio feed to recognizer failed");
                        break;
                    }
                }
                None => {
                    let _ = stream.finish().await;
                    break;
                }
            }
        }
    })
}

async fn read_events(args: &TranscribeArgs) -> TranscribeEnd {
    let mut finalized = String::new();
    let mut partial = String::new();
    let mut next_turn: TurnId = 0;
    let mut retried = false;

    loop {
        let event = tokio::select! {
            _ = args.cancel.cancelled() => return TranscribeEnd::Cancelled,
            event = tokio::time::timeout(args.silence_timeout, args.stream.next_event()) => event,
        };

        match event {
            // Silence timeout: local utterance-boundary fallback.
            Err(_) => {
                if let Some(end) =
                    finalize(args, &mut finalized, &mut partial, &mut next_turn).await
                {
                    return end;
                }
            }
            Ok(Ok(Some(TranscriptEvent::Partial { text }))) => {
                retried = false;
                partial = text;
            }
            Ok(Ok(Some(TranscriptEvent::Final { text }))) => {
                retried = false;
                if !finalized.is_empty() {
                    finalized.push(' ');
                }
                finalized.push_str(&text);
                partial.clear();
            }
            Ok(Ok(Some(TranscriptEvent::UtteranceEnd))) => {
                if let Some(end) =
                    finalize(args, &mut finalized, &mut partial, &mut next_turn).await
                {
                    return end;
                }
            }
            Ok(Ok(Some(TranscriptEvent::SpeechStart))) => {
                // Barge-in: everything before the upcoming turn is stale.
                // Receivers are only woken when the watermark actually moves.
                args.watermark.send_if_modified(|active| {
                    if *active < next_turn {
                        *active = next_turn;
                        true
                    } else {
                        false
                    }
                });
                tracing::debug!(turn = next_turn, "speech start, watermark advanced");
            }
            Ok(Ok(None)) => {
                if let Some(end) =
                    finalize(args, &mut finalized, &mut partial, &mut next_turn).await
                {
                    return end;
                }
                return TranscribeEnd::InputEnded;
            }
            Ok(Err(err)) if err.is_transient() && !retried => {
                retried = true;
                tracing::warn!(error = %err, "transcription event failed, retrying once");
                tokio::time::sleep(args.retry_backoff).await;
            }
            Ok(Err(err)) => {
                return TranscribeEnd::Failed(exhausted(err));
            }
        }
    }
}

/// Dispatches pending text as a finalized utterance, if any.
///
/// Returns `Some(end)` only when dispatch itself can no longer proceed.
async fn finalize(
    args: &TranscribeArgs,
    finalized: &mut String,
    partial: &mut String,
    next_turn: &mut TurnId,
) -> Option<TranscribeEnd> {
    let text = if finalized.is_empty() {
        std::mem::take(partial)
    } else {
        partial.clear();
        std::mem::take(finalized)
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let turn = *next_turn;
    *next_turn += 1;

    tracing::debug!(turn, text = %text, "utterance finalized");
    match args.utterance_tx.send(Utterance { turn, text }).await {
        Ok(()) => None,
        Err(_) => Some(TranscribeEnd::Failed(PipelineError::QueueClosed {
            stage: "transcribe",
        })),
    }
}

fn exhausted(source: ProviderError) -> PipelineError {
    PipelineError::RetriesExhausted {
        stage: "transcribe",
        source,
    }
}
