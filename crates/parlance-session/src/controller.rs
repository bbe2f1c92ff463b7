//! Per-call lifecycle state machine.
//!
//! `Created -> Warming -> Active -> Draining -> Closed`, forward-only. The
//! warming window runs the synthesis pre-warm concurrently with opening the
//! recognition stream, so the expensive handshake overlaps setup work that
//! has to happen anyway. Warmup failure degrades the session to one-shot
//! synthesis; it never blocks past its deadline and never ends the call.
//!
//! `start` runs the call to completion and cannot fail: every outcome, fatal
//! ones included, is reported as a `CloseReason` on the transport.

use crate::config::SessionConfig;
use crate::prompts;
use chrono::{DateTime, Utc};
use parlance_pipeline::{
    CallTransport, PipelineConfig, PipelineEnd, SessionPipeline, SynthesisPath,
};
use parlance_providers::{ConnectionWarmer, ServiceRegistry, TranscriptionStream};
use parlance_types::{CloseReason, SessionId, SessionState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct SessionController {
    id: SessionId,
    started_at: DateTime<Utc>,
    state: SessionState,
    registry: Arc<ServiceRegistry>,
    config: SessionConfig,
}

impl SessionController {
    pub fn new(registry: Arc<ServiceRegistry>, config: SessionConfig) -> Self {
        Self {
            id: SessionId::new_v4(),
            started_at: Utc::now(),
            state: SessionState::Created,
            registry,
            config,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Runs the call to completion. The returned reason has already been
    /// delivered to the transport's close signal.
    pub async fn start(
        mut self,
        transport: Arc<dyn CallTransport>,
        cancel: CancellationToken,
    ) -> CloseReason {
        let reason = self.run(Arc::clone(&transport), cancel).await;
        self.advance(SessionState::Closed);
        transport.close(&reason).await;
        tracing::info!(session = %self.id, reason = reason.code(), "session closed");
        reason
    }

    async fn run(
        &mut self,
        transport: Arc<dyn CallTransport>,
        cancel: CancellationToken,
    ) -> CloseReason {
        self.advance(SessionState::Warming);

        let (synthesis, stream) = match self.warm_up().await {
            Ok(warmed) => warmed,
            Err(reason) => {
                self.advance(SessionState::Draining);
                return reason;
            }
        };

        self.advance(SessionState::Active);
        let generation = match self.registry.generation() {
            Ok(service) => service,
            Err(err) => {
                self.advance(SessionState::Draining);
                return CloseReason::Internal(err.to_string());
            }
        };

        let pipeline = SessionPipeline::new(
            self.pipeline_config(),
            stream,
            generation,
            synthesis,
            transport,
        );
        let end = pipeline.run(cancel).await;

        self.advance(SessionState::Draining);
        match end {
            PipelineEnd::InputEnded => CloseReason::RemoteDisconnect,
            PipelineEnd::Cancelled => CloseReason::ServerShutdown,
            PipelineEnd::Fatal(err) => {
                tracing::error!(session = %self.id, error = %err, "pipeline failed");
                CloseReason::ProviderFailure
            }
        }
    }

    /// The warming window: synthesis pre-warm and recognition stream setup
    /// run concurrently, both bounded by the warmup timeout.
    async fn warm_up(&self) -> Result<(SynthesisPath, Box<dyn TranscriptionStream>), CloseReason> {
        let transcription = self
            .registry
            .transcription()
            .map_err(|err| CloseReason::Internal(err.to_string()))?;
        let synthesis = self
            .registry
            .synthesis()
            .map_err(|err| CloseReason::Internal(err.to_string()))?;

        let warmer = ConnectionWarmer::new(Arc::clone(&synthesis));
        let timeout = self.config.warmup_timeout();

        let open_stream = async {
            if self.config.prewarm_transcription {
                if let Err(err) = transcription.probe().await {
                    tracing::warn!(session = %self.id, error = %err, "transcription pre-warm probe failed");
                }
            }
            tokio::time::timeout(timeout, transcription.open_stream()).await
        };

        let (warm_result, stream_result) = tokio::join!(warmer.warm(timeout), open_stream);

        // No recognition stream means no call at all.
        let stream = match stream_result {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                tracing::error!(session = %self.id, error = %err, "recognition stream open failed");
                return Err(CloseReason::ProviderFailure);
            }
            Err(_) => {
                tracing::error!(session = %self.id, "recognition stream open timed out");
                return Err(CloseReason::ProviderFailure);
            }
        };

        let path = match warm_result {
            Ok(warmed) => SynthesisPath::Streaming {
                connection: warmed.connection(),
                service: synthesis,
            },
            Err(err) => {
                tracing::warn!(session = %self.id, error = %err, "synthesis warmup failed, degrading to one-shot");
                SynthesisPath::OneShot { service: synthesis }
            }
        };
        Ok((path, stream))
    }

    fn pipeline_config(&self) -> PipelineConfig {
        let ctx = &self.config.context;
        let mut pipeline = self.config.pipeline.clone();
        pipeline.system_prompt = prompts::system_prompt(ctx);
        pipeline.greeting = Some(prompts::greeting(ctx));
        pipeline.fallback_reply = prompts::fallback_reply(ctx.language);
        pipeline
    }

    fn advance(&mut self, next: SessionState) {
        match self.state.advance_to(next) {
            Ok(state) => {
                self.state = state;
                tracing::info!(session = %self.id, state = state.label(), "session state");
            }
            Err(err) => {
                tracing::error!(session = %self.id, error = %err, "refused state transition");
            }
        }
    }
}
