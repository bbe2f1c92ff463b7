//! Session admission, the live-session table, and orderly shutdown.
//!
//! The supervisor never mediates call data; the pipeline talks to its
//! transport directly. It only owns admission (capacity cap), the table of
//! live sessions, and the shutdown drain.

use crate::config::SessionConfig;
use crate::controller::SessionController;
use crate::error::SessionError;
use chrono::{DateTime, Utc};
use parlance_pipeline::CallTransport;
use parlance_providers::ServiceRegistry;
use parlance_types::{CloseReason, ServiceKind, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct SessionEntry {
    cancel: CancellationToken,
    task: JoinHandle<CloseReason>,
    started_at: DateTime<Utc>,
}

pub struct CallSupervisor {
    registry: Arc<ServiceRegistry>,
    config: SessionConfig,
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
    shutdown: CancellationToken,
}

impl CallSupervisor {
    pub fn new(registry: Arc<ServiceRegistry>, config: SessionConfig) -> Self {
        Self {
            registry,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Admits a call and spawns its session. The session runs detached; its
    /// outcome reaches the caller through the transport's close signal.
    pub async fn on_new_call(
        &self,
        transport: Arc<dyn CallTransport>,
    ) -> Result<SessionId, SessionError> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::ShuttingDown);
        }
        for kind in ServiceKind::ALL {
            self.registry.get(kind).map_err(|err| SessionError::Fatal {
                reason: err.to_string(),
            })?;
        }

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| !entry.task.is_finished());
        if sessions.len() >= self.config.max_sessions {
            return Err(SessionError::CapacityExceeded {
                limit: self.config.max_sessions,
            });
        }

        let controller = SessionController::new(Arc::clone(&self.registry), self.config.clone());
        let id = controller.id();
        let started_at = controller.started_at();
        let cancel = self.shutdown.child_token();

        let table = Arc::clone(&self.sessions);
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let reason = controller.start(transport, cancel).await;
                table.write().await.remove(&id);
                reason
            }
        });

        sessions.insert(
            id,
            SessionEntry {
                cancel,
                task,
                started_at,
            },
        );
        tracing::info!(session = %id, live = sessions.len(), "call admitted");
        Ok(id)
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().copied().collect()
    }

    pub async fn session_age(&self, id: SessionId) -> Option<chrono::Duration> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| Utc::now() - entry.started_at)
    }

    /// Cancels one session without touching the others.
    pub async fn terminate(&self, id: SessionId) -> bool {
        match self.sessions.read().await.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops admission, cancels every session, and waits up to the
    /// configured grace period for them to drain.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let entries: Vec<(SessionId, JoinHandle<CloseReason>)> = {
            let mut sessions = self.sessions.write().await;
            sessions
                .drain()
                .map(|(id, entry)| {
                    entry.cancel.cancel();
                    (id, entry.task)
                })
                .collect()
        };
        if entries.is_empty() {
            return;
        }

        tracing::info!(draining = entries.len(), "shutdown: draining sessions");
        let grace = self.config.shutdown_grace();
        for (id, task) in entries {
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(reason)) => {
                    tracing::debug!(session = %id, reason = reason.code(), "session drained");
                }
                Ok(Err(err)) => {
                    tracing::error!(session = %id, error = %err, "session task failed during drain");
                }
                Err(_) => {
                    tracing::warn!(session = %id, "session exceeded shutdown grace, abandoned");
                }
            }
        }
    }
}
