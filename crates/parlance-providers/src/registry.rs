//! Process-wide cache of external service handles.
//!
//! The registry is built exactly once at process start, connectivity-checks
//! every provider eagerly, and is immutable afterwards. It is passed by
//! `Arc` into every session — never a hidden static — so tests can build a
//! registry from scripted handles.

use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::http::{HttpGenerationService, HttpTranscriptionService, HttpSynthesisService};
use crate::traits::{GenerationService, SynthesisService, TranscriptionService};
use parlance_types::{ConnectionState, ServiceKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The shareable client behind a handle.
#[derive(Clone)]
pub enum ServiceClient {
    Transcription(Arc<dyn TranscriptionService>),
    Generation(Arc<dyn GenerationService>),
    Synthesis(Arc<dyn SynthesisService>),
}

impl ServiceClient {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Self::Transcription(_) => ServiceKind::Transcription,
            Self::Generation(_) => ServiceKind::Generation,
            Self::Synthesis(_) => ServiceKind::Synthesis,
        }
    }

    /// Identity equality: two clients are the same iff they share the same
    /// underlying allocation.
    pub fn same_client(&self, other: &ServiceClient) -> bool {
        match (self, other) {
            (Self::Transcription(a), Self::Transcription(b)) => Arc::ptr_eq(a, b),
            (Self::Generation(a), Self::Generation(b)) => Arc::ptr_eq(a, b),
            (Self::Synthesis(a), Self::Synthesis(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// One long-lived external service handle.
#[derive(Clone)]
pub struct ServiceHandle {
    kind: ServiceKind,
    fingerprint: String,
    state: ConnectionState,
    client: ServiceClient,
}

impl ServiceHandle {
    pub fn new(fingerprint: impl Into<String>, client: ServiceClient) -> Self {
        Self {
            kind: client.kind(),
            fingerprint: fingerprint.into(),
            state: ConnectionState::Uninitialized,
            client,
        }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// SHA-256 over credentials and model/voice identifiers; names the
    /// configuration this handle was built from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    /// Runs the provider's connectivity probe and records the outcome.
    pub async fn check(&mut self) -> Result<(), ProviderError> {
        let result = match &self.client {
            ServiceClient::Transcription(svc) => svc.probe().await,
            ServiceClient::Generation(svc) => svc.probe().await,
            ServiceClient::Synthesis(svc) => svc.probe().await,
        };
        match result {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Failed;
                Err(ProviderError::Initialization {
                    kind: self.kind,
                    message: err.to_string(),
                })
            }
        }
    }
}

/// Immutable-after-init cache of one handle per service kind.
pub struct ServiceRegistry {
    handles: HashMap<ServiceKind, ServiceHandle>,
}

impl ServiceRegistry {
    /// Constructs real network clients for all three providers and
    /// connectivity-checks each one, bounded by `startup_timeout` overall.
    ///
    /// Any failure is fatal: the process must refuse calls rather than
    /// accept them and fail per-call.
    pub async fn initialize_all(
        config: &ProvidersConfig,
        startup_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let handles = vec![
            ServiceHandle::new(
                config.transcription.fingerprint(),
                ServiceClient::Transcription(Arc::new(HttpTranscriptionService::new(
                    config.transcription.clone(),
                ))),
            ),
            ServiceHandle::new(
                config.generation.fingerprint(),
                ServiceClient::Generation(Arc::new(HttpGenerationService::new(
                    config.generation.clone(),
                ))),
            ),
            ServiceHandle::new(
                config.synthesis.fingerprint(),
                ServiceClient::Synthesis(Arc::new(HttpSynthesisService::new(
                    config.synthesis.clone(),
                ))),
            ),
        ];

        tokio::time::timeout(startup_timeout, Self::check_all(handles))
            .await
            .map_err(|_| ProviderError::Initialization {
                kind: ServiceKind::Transcription,
                message: format!("startup connectivity checks exceeded {startup_timeout:?}"),
            })?
    }

    async fn check_all(handles: Vec<ServiceHandle>) -> Result<Self, ProviderError> {
        let mut checked = HashMap::new();
        for mut handle in handles {
            handle.check().await?;
            tracing::info!(
                kind = handle.kind().label(),
                fingerprint = handle.fingerprint(),
                "provider handle ready"
            );
            checked.insert(handle.kind(), handle);
        }
        Ok(Self { handles: checked })
    }

    /// Builds a registry from pre-made handles without probing. For tests
    /// and scripted/local operation.
    pub fn with_handles(handles: impl IntoIterator<Item = ServiceHandle>) -> Self {
        Self {
            handles: handles.into_iter().map(|h| (h.kind(), h)).collect(),
        }
    }

    /// Looks up the handle for a service kind.
    pub fn get(&self, kind: ServiceKind) -> Result<&ServiceHandle, ProviderError> {
        self.handles.get(&kind).ok_or(ProviderError::NotReady(kind))
    }

    /// Typed accessor for the transcription client.
    pub fn transcription(&self) -> Result<Arc<dyn TranscriptionService>, ProviderError> {
        match self.get(ServiceKind::Transcription)?.client() {
            ServiceClient::Transcription(svc) => Ok(Arc::clone(svc)),
            _ => Err(ProviderError::NotReady(ServiceKind::Transcription)),
        }
    }

    /// Typed accessor for the generation client.
    pub fn generation(&self) -> Result<Arc<dyn GenerationService>, ProviderError> {
        match self.get(ServiceKind::Generation)?.client() {
            ServiceClient::Generation(svc) => Ok(Arc::clone(svc)),
            _ => Err(ProviderError::NotReady(ServiceKind::Generation)),
        }
    }

    /// Typed accessor for the synthesis client.
    pub fn synthesis(&self) -> Result<Arc<dyn SynthesisService>, ProviderError> {
        match self.get(ServiceKind::Synthesis)?.client() {
            ServiceClient::Synthesis(svc) => Ok(Arc::clone(svc)),
            _ => Err(ProviderError::NotReady(ServiceKind::Synthesis)),
        }
    }
}
