//! Pre-warming of the persistent synthesis connection.
//!
//! Synthesis providers with persistent streaming connections pay a
//! multi-hundred-millisecond handshake. The warmer opens that connection
//! during the call-setup window — which already has idle time — so the cost
//! never lands on a conversational turn. Warmup failure is degradation, not
//! a call-ending error: the session falls back to one-shot synthesis.

use crate::error::ProviderError;
use crate::traits::{SynthesisConnection, SynthesisService};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A live, verified synthesis connection. Cloning shares the connection.
#[derive(Clone)]
pub struct WarmedConnection {
    conn: Arc<dyn SynthesisConnection>,
    warmed_at: Instant,
}

impl std::fmt::Debug for WarmedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmedConnection")
            .field("warmed_at", &self.warmed_at)
            .finish_non_exhaustive()
    }
}

impl WarmedConnection {
    pub fn connection(&self) -> Arc<dyn SynthesisConnection> {
        Arc::clone(&self.conn)
    }

    pub fn age(&self) -> Duration {
        self.warmed_at.elapsed()
    }
}

/// Establishes and caches one warm synthesis connection per session.
pub struct ConnectionWarmer {
    service: Arc<dyn SynthesisService>,
    slot: Mutex<Option<WarmedConnection>>,
    handshakes: AtomicU32,
    retry_backoff: Duration,
}

impl ConnectionWarmer {
    const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(150);

    pub fn new(service: Arc<dyn SynthesisService>) -> Self {
        Self {
            service,
            slot: Mutex::new(None),
            handshakes: AtomicU32::new(0),
            retry_backoff: Self::DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Opens and verifies the streaming connection, bounded by `timeout`.
    ///
    /// A transient failure gets one backoff-and-retry inside the deadline.
    /// If the connection is already warm, it is returned as-is without a
    /// second handshake.
    pub async fn warm(&self, timeout: Duration) -> Result<WarmedConnection, ProviderError> {
        let mut slot = self.slot.lock().await;
        if let Some(warmed) = slot.as_ref() {
            return Ok(warmed.clone());
        }

        let warmed = tokio::time::timeout(timeout, self.connect_with_retry())
            .await
            .map_err(|_| ProviderError::WarmupTimeout(timeout))??;

        *slot = Some(warmed.clone());
        tracing::debug!(
            handshakes = self.handshakes.load(Ordering::Relaxed),
            "synthesis connection warm"
        );
        Ok(warmed)
    }

    async fn connect_with_retry(&self) -> Result<WarmedConnection, ProviderError> {
        match self.open_once().await {
            Ok(warmed) => Ok(warmed),
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "synthesis warmup attempt failed, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                self.open_once().await
            }
            Err(err) => Err(err),
        }
    }

    async fn open_once(&self) -> Result<WarmedConnection, ProviderError> {
        self.handshakes.fetch_add(1, Ordering::Relaxed);
        match self.service.open_connection().await {
            Ok(conn) => Ok(WarmedConnection {
                conn: Arc::from(conn),
                warmed_at: Instant::now(),
            }),
            Err(ProviderError::Rejected { message, .. }) => {
                Err(ProviderError::WarmupRejected(message))
            }
            Err(err) => Err(err),
        }
    }

    /// Number of handshake attempts made so far. Observable so tests can
    /// assert that a second `warm` call is free.
    pub fn handshake_count(&self) -> u32 {
        self.handshakes.load(Ordering::Relaxed)
    }
}
