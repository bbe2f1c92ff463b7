//! Generate stage: finalized utterances in, clause spans out.
//!
//! One utterance is answered at a time, so replies reach synthesis in turn
//! order by construction. Tokens stream through the clause chunker and each
//! completed clause is forwarded immediately, which is what lets synthesis
//! start while the model is still talking. A watermark advance past the
//! current turn aborts the reply mid-stream.

use crate::chunker::ClauseChunker;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::latency::TurnLatency;
use crate::pipeline::{SynthItem, Utterance};
use parlance_providers::{GenerationService, ProviderError, ReplyStream};
use parlance_types::{Message, ServiceKind, TurnId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub(crate) struct GenerateArgs {
    pub service: Arc<dyn GenerationService>,
    pub utterance_rx: mpsc::Receiver<Utterance>,
    pub synth_tx: mpsc::Sender<SynthItem>,
    pub watermark: watch::Receiver<TurnId>,
    pub config: PipelineConfig,
    pub cancel: CancellationToken,
}

enum ReplyOutcome {
    /// Reply streamed to completion; holds the full text for the history.
    Done(String),
    /// Watermark moved past this turn; partial text already dispatched.
    BargedIn(String),
    /// Stream broke before any clause was dispatched; fall back.
    FailedClean,
    /// Stream broke after audio was already on its way; truncate silently.
    FailedDirty(String),
}

pub(crate) async fn run(mut args: GenerateArgs) -> Result<(), PipelineError> {
    let mut history: Vec<Message> = Vec::new();
    if !args.config.system_prompt.is_empty() {
        history.push(Message::system(&args.config.system_prompt));
    }
    let mut greeted = false;

    loop {
        let utterance = tokio::select! {
            _ = args.cancel.cancelled() => return Ok(()),
            utterance = args.utterance_rx.recv() => match utterance {
                Some(utterance) => utterance,
                None => return Ok(()),
            },
        };
        if utterance.turn < *args.watermark.borrow() {
            // Overtaken before it was answered. The caller still said it, so
            // it stays in the history for the reply to the newer turn.
            tracing::debug!(turn = utterance.turn, "overtaken utterance folded into history");
            history.push(Message::user(&utterance.text));
            continue;
        }

        let mut latency = TurnLatency::begin(utterance.turn);

        // The greeting waits for the caller to speak first, then leads the
        // first reply. It goes into the history so the model knows it was
        // already said.
        if !greeted {
            greeted = true;
            if let Some(greeting) = args.config.greeting.clone() {
                history.push(Message::assistant(&greeting));
                send_span(&args.synth_tx, utterance.turn, greeting).await?;
            }
        }

        history.push(Message::user(&utterance.text));

        let outcome = match open_reply(&args, &history).await {
            Ok(stream) => stream_reply(&mut args, utterance.turn, stream, &mut latency).await?,
            Err(err) => {
                tracing::warn!(turn = utterance.turn, error = %err, "reply stream failed to open");
                ReplyOutcome::FailedClean
            }
        };

        match outcome {
            ReplyOutcome::Done(reply) => {
                history.push(Message::assistant(&reply));
                send_end(&args.synth_tx, utterance.turn).await?;
                latency.mark_reply_done();
                latency.record();
            }
            ReplyOutcome::BargedIn(partial) => {
                tracing::debug!(turn = utterance.turn, "reply aborted by barge-in");
                if !partial.is_empty() {
                    history.push(Message::assistant(&partial));
                }
            }
            ReplyOutcome::FailedClean => {
                let apology = args.config.fallback_reply.clone();
                history.push(Message::assistant(&apology));
                send_span(&args.synth_tx, utterance.turn, apology).await?;
                send_end(&args.synth_tx, utterance.turn).await?;
            }
            ReplyOutcome::FailedDirty(partial) => {
                tracing::warn!(turn = utterance.turn, "reply truncated mid-stream");
                if !partial.is_empty() {
                    history.push(Message::assistant(&partial));
                }
                send_end(&args.synth_tx, utterance.turn).await?;
            }
        }
    }
}

/// Opens the reply stream with the stage deadline and a single retry.
async fn open_reply(
    args: &GenerateArgs,
    history: &[Message],
) -> Result<Box<dyn ReplyStream>, PipelineError> {
    let deadline = args.config.stage_timeout();
    let first = match tokio::time::timeout(deadline, args.service.stream_reply(history)).await {
        Ok(Ok(stream)) => return Ok(stream),
        Ok(Err(err)) => err,
        Err(_) => ProviderError::transient(ServiceKind::Generation, "reply stream open timed out"),
    };
    if !first.is_transient() {
        return Err(exhausted(first));
    }

    tracing::warn!(error = %first, "generation open failed, retrying once");
    tokio::time::sleep(args.config.retry_backoff()).await;
    match tokio::time::timeout(deadline, args.service.stream_reply(history)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(exhausted(err)),
        Err(_) => Err(exhausted(ProviderError::transient(
            ServiceKind::Generation,
            "reply stream open timed out",
        ))),
    }
}

async fn stream_reply(
    args: &mut GenerateArgs,
    turn: TurnId,
    mut stream: Box<dyn ReplyStream>,
    latency: &mut TurnLatency,
) -> Result<ReplyOutcome, PipelineError> {
    let mut chunker = ClauseChunker::new();
    let mut reply = String::new();
    let mut dispatched = false;
    let mut watermark_live = true;

    // Clear any notification raised before this turn was dequeued.
    if *args.watermark.borrow_and_update() > turn {
        return Ok(ReplyOutcome::BargedIn(reply));
    }

    loop {
        let next = tokio::time::timeout(args.config.stage_timeout(), stream.next_token());
        tokio::pin!(next);

        // The token future stays pinned across watermark wakeups: dropping
        // it mid-poll would lose a token on streams that are not
        // cancel-safe.
        let token = loop {
            tokio::select! {
                _ = args.cancel.cancelled() => return Ok(ReplyOutcome::BargedIn(reply)),
                changed = args.watermark.changed(), if watermark_live => {
                    match changed {
                        Ok(()) if *args.watermark.borrow() > turn => {
                            return Ok(ReplyOutcome::BargedIn(reply));
                        }
                        Ok(()) => {}
                        // Sender gone means input ended; finish the turn.
                        Err(_) => watermark_live = false,
                    }
                }
                token = &mut next => break token,
            }
        };

        match token {
            Ok(Ok(Some(token))) => {
                latency.mark_first_token();
                reply.push_str(&token);
                if let Some(span) = chunker.push(&token) {
                    send_span(&args.synth_tx, turn, span).await?;
                    dispatched = true;
                }
            }
            Ok(Ok(None)) => {
                if let Some(rest) = chunker.flush() {
                    send_span(&args.synth_tx, turn, rest).await?;
                }
                return Ok(ReplyOutcome::Done(reply));
            }
            Ok(Err(err)) => {
                tracing::warn!(turn, error = %err, "reply stream broke");
                return Ok(failed(dispatched, reply));
            }
            Err(_) => {
                tracing::warn!(turn, "reply stream stalled past deadline");
                return Ok(failed(dispatched, reply));
            }
        }
    }
}

fn failed(dispatched: bool, partial: String) -> ReplyOutcome {
    if dispatched {
        ReplyOutcome::FailedDirty(partial)
    } else {
        ReplyOutcome::FailedClean
    }
}

async fn send_span(
    synth_tx: &mpsc::Sender<SynthItem>,
    turn: TurnId,
    span: String,
) -> Result<(), PipelineError> {
    synth_tx
        .send(SynthItem::Text { turn, span })
        .await
        .map_err(|_| PipelineError::QueueClosed { stage: "generate" })
}

async fn send_end(synth_tx: &mpsc::Sender<SynthItem>, turn: TurnId) -> Result<(), PipelineError> {
    synth_tx
        .send(SynthItem::EndOfReply { turn })
        .await
        .map_err(|_| PipelineError::QueueClosed { stage: "generate" })
}

fn exhausted(source: ProviderError) -> PipelineError {
    PipelineError::RetriesExhausted {
        stage: "generate",
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlance_providers::scripted::{ScriptedGeneration, ScriptedReply};
    use parlance_types::Role;

    #[tokio::test]
    async fn overtaken_utterance_still_reaches_the_history() {
        let service = Arc::new(ScriptedGeneration::new(vec![ScriptedReply::instant(&[
            "Noted.",
        ])]));
        let (utterance_tx, utterance_rx) = mpsc::channel(4);
        let (synth_tx, mut synth_rx) = mpsc::channel(8);
        // Turn 0 was overtaken twice before generation got to it.
        let (_watermark_tx, watermark) = watch::channel(2);

        utterance_tx
            .send(Utterance {
                turn: 0,
                text: "are you there".to_string(),
            })
            .await
            .unwrap();
        utterance_tx
            .send(Utterance {
                turn: 2,
                text: "hello".to_string(),
            })
            .await
            .unwrap();
        drop(utterance_tx);

        let drain = tokio::spawn(async move { while synth_rx.recv().await.is_some() {} });

        let generation: Arc<dyn GenerationService> = service.clone();
        run(GenerateArgs {
            service: generation,
            utterance_rx,
            synth_tx,
            watermark,
            config: PipelineConfig::default(),
            cancel: CancellationToken::new(),
        })
        .await
        .unwrap();
        drain.await.unwrap();

        let histories = service.recorded_histories().await;
        assert_eq!(histories.len(), 1, "only the live turn should be answered");
        let users: Vec<&str> = histories[0]
            .iter()
            .filter(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(users, ["are you there", "hello"]);
    }
}
