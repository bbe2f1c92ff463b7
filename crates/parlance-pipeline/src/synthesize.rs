//! Synthesize stage: clause spans in, caller audio out.
//!
//! On the streaming path a reader task drains provider audio and forwards it
//! to the transport while the main loop keeps feeding text, so the first
//! clause can be playing while later clauses are still being synthesized.
//! Audio is matched back to its turn through a queue of pending tags and
//! dropped when the watermark has moved past that turn.
//!
//! If the streaming connection is lost the stage degrades in place to
//! per-span one-shot synthesis. Only when one-shot synthesis also exhausts
//! its retry does the stage fail the pipeline.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::latency;
use crate::pipeline::{SynthItem, SynthesisPath};
use crate::transport::CallTransport;
use parlance_providers::{ProviderError, SynthesisConnection, SynthesisService};
use parlance_types::{AudioChunk, ServiceKind, TurnId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) struct SynthesizeArgs {
    pub path: SynthesisPath,
    pub transport: Arc<dyn CallTransport>,
    pub synth_rx: mpsc::Receiver<SynthItem>,
    pub watermark: watch::Receiver<TurnId>,
    pub config: PipelineConfig,
    pub cancel: CancellationToken,
}

/// Turn tags for audio still inside the provider, in submission order.
type PendingTags = Arc<Mutex<VecDeque<(TurnId, Instant)>>>;

struct Ctx {
    transport: Arc<dyn CallTransport>,
    watermark: watch::Receiver<TurnId>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

enum Mode {
    Streaming {
        conn: Arc<dyn SynthesisConnection>,
        service: Arc<dyn SynthesisService>,
        pending: PendingTags,
        reader: tokio::task::JoinHandle<()>,
    },
    OneShot {
        service: Arc<dyn SynthesisService>,
    },
}

pub(crate) async fn run(args: SynthesizeArgs) -> Result<(), PipelineError> {
    let SynthesizeArgs {
        path,
        transport,
        mut synth_rx,
        watermark,
        config,
        cancel,
    } = args;
    let ctx = Ctx {
        transport,
        watermark,
        config,
        cancel,
    };

    let mut mode = match path {
        SynthesisPath::Streaming {
            connection,
            service,
        } => {
            let pending: PendingTags = Arc::new(Mutex::new(VecDeque::new()));
            let reader = spawn_reader(
                Arc::clone(&connection),
                Arc::clone(&ctx.transport),
                Arc::clone(&pending),
                ctx.watermark.clone(),
                ctx.cancel.clone(),
            );
            Mode::Streaming {
                conn: connection,
                service,
                pending,
                reader,
            }
        }
        SynthesisPath::OneShot { service } => {
            tracing::info!("synthesis running in one-shot mode");
            Mode::OneShot { service }
        }
    };

    let result = feed(&ctx, &mut synth_rx, &mut mode).await;

    if let Mode::Streaming {
        conn,
        pending,
        reader,
        ..
    } = mode
    {
        if result.is_ok() && !ctx.cancel.is_cancelled() {
            let _ = conn.flush().await;
            wait_for_drain(&pending, ctx.config.stage_timeout(), &ctx.cancel).await;
        }
        conn.close().await;
        let _ = reader.await;
    }

    result
}

async fn feed(
    ctx: &Ctx,
    synth_rx: &mut mpsc::Receiver<SynthItem>,
    mode: &mut Mode,
) -> Result<(), PipelineError> {
    loop {
        let item = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            item = synth_rx.recv() => match item {
                Some(item) => item,
                None => return Ok(()),
            },
        };

        match item {
            SynthItem::Text { turn, span } => {
                if turn < *ctx.watermark.borrow() {
                    tracing::debug!(turn, "stale span discarded before synthesis");
                    continue;
                }
                dispatch_span(ctx, mode, turn, span).await?;
            }
            SynthItem::EndOfReply { turn } => {
                if let Mode::Streaming { conn, pending, .. } = mode {
                    if let Err(err) = conn.flush().await {
                        tracing::warn!(turn, error = %err, "flush failed on synthesis stream");
                    }
                    // Settle this reply's audio before the next turn is
                    // tagged. A provider that merges spans into fewer chunks
                    // leaves tags behind; carried forward they would mis-tag
                    // the next turn's audio.
                    wait_for_drain(pending, ctx.config.stage_timeout(), &ctx.cancel).await;
                    let leftover = {
                        let mut tags = pending.lock().unwrap_or_else(|e| e.into_inner());
                        let count = tags.len();
                        tags.clear();
                        count
                    };
                    if leftover > 0 {
                        tracing::debug!(turn, leftover, "cleared unmatched synthesis tags");
                    }
                }
            }
        }
    }
}

async fn dispatch_span(
    ctx: &Ctx,
    mode: &mut Mode,
    turn: TurnId,
    span: String,
) -> Result<(), PipelineError> {
    if let Mode::Streaming {
        conn,
        service,
        pending,
        reader,
    } = mode
    {
        tag(pending, turn);
        match send_with_retry(conn.as_ref(), &span, ctx.config.retry_backoff()).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                // Un-tag the span that never made it in, then degrade.
                untag(pending);
                tracing::warn!(error = %err, "synthesis stream lost, degrading to one-shot");
                conn.close().await;
                reader.abort();
                *mode = Mode::OneShot {
                    service: Arc::clone(service),
                };
            }
        }
    }

    if let Mode::OneShot { service } = mode {
        one_shot(ctx, service.as_ref(), turn, &span).await?;
    }
    Ok(())
}

fn tag(pending: &PendingTags, turn: TurnId) {
    pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push_back((turn, Instant::now()));
}

fn untag(pending: &PendingTags) {
    pending.lock().unwrap_or_else(|e| e.into_inner()).pop_back();
}

/// One send attempt plus a single backoff retry on transient failure.
async fn send_with_retry(
    conn: &dyn SynthesisConnection,
    span: &str,
    backoff: Duration,
) -> Result<(), ProviderError> {
    match conn.send_text(span).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_transient() => {
            tracing::warn!(error = %err, "synthesis send failed, retrying once");
            tokio::time::sleep(backoff).await;
            conn.send_text(span).await
        }
        Err(err) => Err(err),
    }
}

/// Synthesizes one span via the one-shot endpoint and dispatches the audio.
async fn one_shot(
    ctx: &Ctx,
    service: &dyn SynthesisService,
    turn: TurnId,
    span: &str,
) -> Result<(), PipelineError> {
    let deadline = ctx.config.stage_timeout();
    let submitted = Instant::now();

    let first = match tokio::time::timeout(deadline, service.synthesize_once(span)).await {
        Ok(Ok(audio)) => {
            return deliver(ctx, turn, audio, submitted).await;
        }
        Ok(Err(err)) => err,
        Err(_) => timed_out(),
    };
    if !first.is_transient() {
        return Err(exhausted(first));
    }

    tracing::warn!(error = %first, "one-shot synthesis failed, retrying once");
    tokio::time::sleep(ctx.config.retry_backoff()).await;
    match tokio::time::timeout(deadline, service.synthesize_once(span)).await {
        Ok(Ok(audio)) => deliver(ctx, turn, audio, submitted).await,
        Ok(Err(err)) => Err(exhausted(err)),
        Err(_) => Err(exhausted(timed_out())),
    }
}

async fn deliver(
    ctx: &Ctx,
    turn: TurnId,
    audio: Vec<u8>,
    submitted: Instant,
) -> Result<(), PipelineError> {
    // The caller may have barged in while synthesis ran.
    if turn < *ctx.watermark.borrow() {
        tracing::debug!(turn, "stale audio discarded after one-shot synthesis");
        return Ok(());
    }
    latency::record_audio_dispatch(turn, 0, submitted.elapsed().as_millis() as u64);
    ctx.transport
        .send_audio(AudioChunk::new(audio, turn))
        .await
        .map_err(|_| PipelineError::QueueClosed {
            stage: "synthesize",
        })
}

/// Forwards provider audio to the transport until the connection closes.
fn spawn_reader(
    conn: Arc<dyn SynthesisConnection>,
    transport: Arc<dyn CallTransport>,
    pending: PendingTags,
    watermark: watch::Receiver<TurnId>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_turn: TurnId = 0;
        let mut chunk_index: u64 = 0;
        loop {
            let audio = tokio::select! {
                _ = cancel.cancelled() => break,
                audio = conn.next_audio() => audio,
            };
            match audio {
                Ok(Some(payload)) => {
                    let tag = pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .pop_front();
                    let (turn, submitted) = match tag {
                        Some((turn, submitted)) => {
                            last_turn = turn;
                            (turn, Some(submitted))
                        }
                        // Provider split one span into several chunks.
                        None => (last_turn, None),
                    };
                    if turn < *watermark.borrow() {
                        tracing::debug!(turn, "stale audio discarded after barge-in");
                        continue;
                    }
                    let since_text_ms = submitted
                        .map(|at| at.elapsed().as_millis() as u64)
                        .unwrap_or(0);
                    latency::record_audio_dispatch(turn, chunk_index, since_text_ms);
                    chunk_index += 1;
                    if transport
                        .send_audio(AudioChunk::new(payload, turn))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "synthesis audio stream broke");
                    break;
                }
            }
        }
    })
}

/// Polls until all submitted spans have produced audio, up to the deadline.
async fn wait_for_drain(pending: &PendingTags, deadline: Duration, cancel: &CancellationToken) {
    let started = Instant::now();
    while started.elapsed() < deadline && !cancel.is_cancelled() {
        if pending.lock().unwrap_or_else(|e| e.into_inner()).is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if !pending.lock().unwrap_or_else(|e| e.into_inner()).is_empty() {
        tracing::warn!("synthesis drain gave up with audio still pending");
    }
}

fn timed_out() -> ProviderError {
    ProviderError::transient(ServiceKind::Synthesis, "one-shot synthesis timed out")
}

fn exhausted(source: ProviderError) -> PipelineError {
    PipelineError::RetriesExhausted {
        stage: "synthesize",
        source,
    }
}
