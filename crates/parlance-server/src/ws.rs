//! The call WebSocket endpoint.
//!
//! Binary frames in are caller audio; binary frames out are synthesized
//! audio. The close frame's reason field carries the session's
//! `CloseReason` code so telephony gateways can log why a call ended.

use crate::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parlance_pipeline::{CallTransport, TransportClosed};
use parlance_session::SessionError;
use parlance_types::{AudioChunk, CloseReason};
use std::sync::Arc;
use tokio::sync::Mutex;

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(supervisor) = state.supervisor() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    ws.on_upgrade(move |socket| handle_call(socket, supervisor))
        .into_response()
}

async fn handle_call(socket: WebSocket, supervisor: Arc<parlance_session::CallSupervisor>) {
    let transport = Arc::new(WsCallTransport::new(socket));
    let call_transport: Arc<dyn CallTransport> = transport.clone();
    match supervisor.on_new_call(call_transport).await {
        Ok(id) => tracing::debug!(session = %id, "websocket call admitted"),
        Err(err) => {
            tracing::warn!(error = %err, "websocket call refused");
            transport.close(&refusal_reason(err)).await;
        }
    }
}

/// Maps an admission refusal onto the close code the gateway sees, so
/// overload is distinguishable from faults.
fn refusal_reason(err: SessionError) -> CloseReason {
    match err {
        SessionError::CapacityExceeded { .. } => CloseReason::Busy,
        SessionError::ShuttingDown => CloseReason::ServerShutdown,
        SessionError::Fatal { reason } => CloseReason::Internal(reason),
    }
}

/// One call's WebSocket, split so the pipeline can read caller audio and
/// write synthesized audio concurrently.
pub struct WsCallTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
}

impl WsCallTransport {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait::async_trait]
impl CallTransport for WsCallTransport {
    async fn next_audio(&self) -> Option<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await? {
                Ok(Message::Binary(data)) => return Some(data.to_vec()),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by the socket itself; text and pongs
                // carry no audio.
                Ok(_) => continue,
                Err(err) => {
                    tracing::debug!(error = %err, "websocket read failed");
                    return None;
                }
            }
        }
    }

    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), TransportClosed> {
        self.sink
            .lock()
            .await
            .send(Message::Binary(chunk.payload.into()))
            .await
            .map_err(|_| TransportClosed)
    }

    async fn close(&self, reason: &CloseReason) {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: reason.code().to_string().into(),
        };
        // Best effort: the peer may already be gone.
        let _ = self
            .sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusals_map_to_distinct_close_codes() {
        assert_eq!(
            refusal_reason(SessionError::CapacityExceeded { limit: 4 }).code(),
            "busy"
        );
        assert_eq!(
            refusal_reason(SessionError::ShuttingDown).code(),
            "server_shutdown"
        );
        assert_eq!(
            refusal_reason(SessionError::Fatal {
                reason: "providers never initialized".to_string()
            })
            .code(),
            "internal"
        );
    }
}
