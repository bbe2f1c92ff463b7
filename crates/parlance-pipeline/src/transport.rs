//! The transport seam between a call's network connection and its pipeline.
//!
//! The server layer owns the actual WebSocket; the pipeline only sees this
//! trait. [`ChannelTransport`] is an in-process implementation over channels,
//! used by the test suites and for local development without a telephony
//! provider.

use async_trait::async_trait;
use parlance_types::{AudioChunk, CloseReason};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};

/// The remote side of the call is gone.
#[derive(Debug, Error)]
#[error("call transport closed")]
pub struct TransportClosed;

/// Duplex audio boundary for one call.
#[async_trait]
pub trait CallTransport: Send + Sync {
    /// Next span of caller audio. `None` once the caller disconnects.
    async fn next_audio(&self) -> Option<Vec<u8>>;

    /// Dispatches a span of synthesized audio to the caller.
    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), TransportClosed>;

    /// Terminal close signal with the session's outcome. Idempotent.
    async fn close(&self, reason: &CloseReason);
}

/// Channel-backed transport for tests and local runs.
pub struct ChannelTransport {
    incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outgoing: mpsc::UnboundedSender<AudioChunk>,
    closed: watch::Sender<Option<CloseReason>>,
}

/// The caller's half of a [`ChannelTransport`].
pub struct CallerSide {
    /// Feed caller audio here; drop it to hang up.
    pub audio_in: mpsc::UnboundedSender<Vec<u8>>,
    /// Synthesized audio dispatched to the caller.
    pub audio_out: mpsc::UnboundedReceiver<AudioChunk>,
    /// Becomes `Some(reason)` when the session closes the call.
    pub closed: watch::Receiver<Option<CloseReason>>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, CallerSide) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(None);
        (
            Self {
                incoming: Mutex::new(in_rx),
                outgoing: out_tx,
                closed: closed_tx,
            },
            CallerSide {
                audio_in: in_tx,
                audio_out: out_rx,
                closed: closed_rx,
            },
        )
    }
}

#[async_trait]
impl CallTransport for ChannelTransport {
    async fn next_audio(&self) -> Option<Vec<u8>> {
        self.incoming.lock().await.recv().await
    }

    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), TransportClosed> {
        self.outgoing.send(chunk).map_err(|_| TransportClosed)
    }

    async fn close(&self, reason: &CloseReason) {
        self.closed.send_replace(Some(reason.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn audio_flows_both_ways_and_close_is_observable() {
        let (transport, mut caller) = ChannelTransport::pair();

        caller.audio_in.send(vec![1, 2, 3]).unwrap();
        assert_eq!(transport.next_audio().await.unwrap(), vec![1, 2, 3]);

        transport
            .send_audio(AudioChunk::new(vec![9], 0))
            .await
            .unwrap();
        assert_eq!(caller.audio_out.recv().await.unwrap().payload, vec![9]);

        transport.close(&CloseReason::RemoteDisconnect).await;
        assert_eq!(
            caller.closed.borrow().as_ref().unwrap().code(),
            "remote_disconnect"
        );
    }

    #[tokio::test]
    async fn dropping_the_caller_ends_the_audio_stream() {
        let (transport, caller) = ChannelTransport::pair();
        drop(caller.audio_in);
        assert!(transport.next_audio().await.is_none());
    }
}
