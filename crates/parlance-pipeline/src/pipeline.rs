//! Pipeline assembly and lifecycle.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::transport::CallTransport;
use crate::{generate, synthesize, transcribe};
use parlance_providers::{
    GenerationService, SynthesisConnection, SynthesisService, TranscriptionStream,
};
use parlance_types::TurnId;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Finalized utterances waiting on generation. Small: the caller rarely gets
/// more than a turn or two ahead of the bot.
const UTTERANCE_QUEUE_DEPTH: usize = 4;

/// Clause spans waiting on synthesis. This is the backpressure point that
/// suspends generation when synthesis falls behind.
const SYNTH_QUEUE_DEPTH: usize = 8;

/// A finalized caller utterance, tagged with its turn.
pub(crate) struct Utterance {
    pub turn: TurnId,
    pub text: String,
}

/// Work items on the generate-to-synthesize queue.
pub(crate) enum SynthItem {
    Text { turn: TurnId, span: String },
    EndOfReply { turn: TurnId },
}

/// Which synthesis route this session got out of warmup.
pub enum SynthesisPath {
    /// Pre-warmed persistent connection; lowest latency.
    Streaming {
        connection: Arc<dyn SynthesisConnection>,
        service: Arc<dyn SynthesisService>,
    },
    /// Warmup failed; every span goes through the one-shot endpoint.
    OneShot { service: Arc<dyn SynthesisService> },
}

/// How a pipeline run ended.
#[derive(Debug)]
pub enum PipelineEnd {
    /// The caller disconnected or the recognition stream closed; queued
    /// replies were drained before returning.
    InputEnded,
    /// Cancelled from outside, typically server shutdown.
    Cancelled,
    /// A stage failed past its retry budget.
    Fatal(PipelineError),
}

/// The per-call streaming pipeline.
///
/// Built by the session layer once warmup resolves, run to completion once.
pub struct SessionPipeline {
    config: PipelineConfig,
    transcription: Box<dyn TranscriptionStream>,
    generation: Arc<dyn GenerationService>,
    synthesis: SynthesisPath,
    transport: Arc<dyn CallTransport>,
}

impl SessionPipeline {
    pub fn new(
        config: PipelineConfig,
        transcription: Box<dyn TranscriptionStream>,
        generation: Arc<dyn GenerationService>,
        synthesis: SynthesisPath,
        transport: Arc<dyn CallTransport>,
    ) -> Self {
        Self {
            config,
            transcription,
            generation,
            synthesis,
            transport,
        }
    }

    /// Runs the three stages until input ends, the token is cancelled, or a
    /// stage fails fatally. Always drains in-flight replies on a clean end.
    pub async fn run(self, cancel: CancellationToken) -> PipelineEnd {
        let (utterance_tx, utterance_rx) = mpsc::channel(UTTERANCE_QUEUE_DEPTH);
        let (synth_tx, synth_rx) = mpsc::channel(SYNTH_QUEUE_DEPTH);
        let (watermark_tx, watermark_rx) = watch::channel(0 as TurnId);

        let generate_task = spawn_stage(
            cancel.clone(),
            generate::run(generate::GenerateArgs {
                service: self.generation,
                utterance_rx,
                synth_tx,
                watermark: watermark_rx.clone(),
                config: self.config.clone(),
                cancel: cancel.clone(),
            }),
        );
        let synthesize_task = spawn_stage(
            cancel.clone(),
            synthesize::run(synthesize::SynthesizeArgs {
                path: self.synthesis,
                transport: Arc::clone(&self.transport),
                synth_rx,
                watermark: watermark_rx,
                config: self.config.clone(),
                cancel: cancel.clone(),
            }),
        );

        let transcribe_end = transcribe::run(transcribe::TranscribeArgs {
            stream: Arc::from(self.transcription),
            transport: Arc::clone(&self.transport),
            utterance_tx,
            watermark: watermark_tx,
            silence_timeout: self.config.silence_timeout(),
            retry_backoff: self.config.retry_backoff(),
            cancel: cancel.clone(),
        })
        .await;

        if let transcribe::TranscribeEnd::Failed(_) = &transcribe_end {
            cancel.cancel();
        }

        // Channel senders dropped with the transcribe args; downstream
        // stages drain their queues and exit in cascade.
        let generate_result = join_stage("generate", generate_task).await;
        let synthesize_result = join_stage("synthesize", synthesize_task).await;

        match transcribe_end {
            transcribe::TranscribeEnd::Failed(err) => PipelineEnd::Fatal(err),
            _ => {
                if let Err(err) = generate_result {
                    return PipelineEnd::Fatal(err);
                }
                if let Err(err) = synthesize_result {
                    return PipelineEnd::Fatal(err);
                }
                match transcribe_end {
                    transcribe::TranscribeEnd::Cancelled => PipelineEnd::Cancelled,
                    _ => PipelineEnd::InputEnded,
                }
            }
        }
    }
}

/// Spawns a stage and cancels the whole pipeline if it returns an error, so
/// the other stages stop waiting on their queues.
fn spawn_stage(
    cancel: CancellationToken,
    stage: impl std::future::Future<Output = Result<(), PipelineError>> + Send + 'static,
) -> tokio::task::JoinHandle<Result<(), PipelineError>> {
    tokio::spawn(async move {
        let result = stage.await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    })
}

async fn join_stage(
    stage: &'static str,
    handle: tokio::task::JoinHandle<Result<(), PipelineError>>,
) -> Result<(), PipelineError> {
    match handle.await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(stage, error = %err, "pipeline stage task failed");
            Err(PipelineError::QueueClosed { stage })
        }
    }
}
