//! Scripted in-process providers.
//!
//! These run the full pipeline without any network: transcription replays a
//! timed event script, generation streams canned token sequences, and
//! synthesis turns each text span into an audio span whose payload is the
//! text's bytes (which lets tests assert exactly which turn a chunk came
//! from). Used by the test suites across the workspace and by local
//! development without provider credentials.

use crate::error::ProviderError;
use crate::traits::{
    GenerationService, ReplyStream, SynthesisConnection, SynthesisService, TranscriptionService,
    TranscriptionStream,
};
use async_trait::async_trait;
use parlance_types::{Message, ServiceKind, TranscriptEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// One timed transcript event in a scripted recognition stream.
#[derive(Debug, Clone)]
pub struct TimedTranscript {
    /// Wait this long before emitting the event.
    pub delay: Duration,
    pub event: TranscriptEvent,
}

impl TimedTranscript {
    pub fn after(delay: Duration, event: TranscriptEvent) -> Self {
        Self { delay, event }
    }
}

/// Scripted speech-to-text provider.
#[derive(Default)]
pub struct ScriptedTranscription {
    script: Vec<TimedTranscript>,
    fail_probe: bool,
    streams_opened: AtomicU32,
}

impl ScriptedTranscription {
    pub fn new(script: Vec<TimedTranscript>) -> Self {
        Self {
            script,
            fail_probe: false,
            streams_opened: AtomicU32::new(0),
        }
    }

    pub fn failing_probe() -> Self {
        Self {
            script: Vec::new(),
            fail_probe: true,
            streams_opened: AtomicU32::new(0),
        }
    }

    pub fn streams_opened(&self) -> u32 {
        self.streams_opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TranscriptionService for ScriptedTranscription {
    async fn probe(&self) -> Result<(), ProviderError> {
        if self.fail_probe {
            Err(ProviderError::rejected(
                ServiceKind::Transcription,
                "scripted probe failure",
            ))
        } else {
            Ok(())
        }
    }

    async fn open_stream(&self) -> Result<Box<dyn TranscriptionStream>, ProviderError> {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(ScriptedTranscriptionStream {
            events: Mutex::new(self.script.clone().into()),
            next_due: Mutex::new(None),
            audio_bytes: AtomicUsize::new(0),
        }))
    }
}

struct ScriptedTranscriptionStream {
    events: Mutex<VecDeque<TimedTranscript>>,
    /// Absolute deadline of the front event, fixed on its first poll so an
    /// abandoned `next_event` call neither loses the event nor restarts its
    /// delay.
    next_due: Mutex<Option<Instant>>,
    audio_bytes: AtomicUsize,
}

#[async_trait]
impl TranscriptionStream for ScriptedTranscriptionStream {
    async fn send_audio(&self, payload: &[u8]) -> Result<(), ProviderError> {
        self.audio_bytes.fetch_add(payload.len(), Ordering::Relaxed);
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<TranscriptEvent>, ProviderError> {
        let due = {
            let events = self.events.lock().await;
            let Some(front) = events.front() else {
                return Ok(None);
            };
            let mut due = self.next_due.lock().await;
            *due.get_or_insert_with(|| Instant::now() + front.delay)
        };
        tokio::time::sleep_until(due).await;

        let event = self.events.lock().await.pop_front().map(|timed| timed.event);
        *self.next_due.lock().await = None;
        Ok(event)
    }

    async fn finish(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// One canned reply: a token sequence streamed with a fixed inter-token
/// delay.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub tokens: Vec<String>,
    pub token_delay: Duration,
}

impl ScriptedReply {
    pub fn instant(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            token_delay: Duration::ZERO,
        }
    }

    pub fn paced(tokens: &[&str], token_delay: Duration) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            token_delay,
        }
    }
}

/// Scripted language-model provider.
pub struct ScriptedGeneration {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fail_first_calls: AtomicU32,
    histories: Mutex<Vec<Vec<Message>>>,
    fail_probe: bool,
}

impl Default for ScriptedGeneration {
    fn default() -> Self {
        Self::new(vec![ScriptedReply::instant(&["Okay."])])
    }
}

impl ScriptedGeneration {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fail_first_calls: AtomicU32::new(0),
            histories: Mutex::new(Vec::new()),
            fail_probe: false,
        }
    }

    /// The first `n` `stream_reply` calls fail with a transient error.
    pub fn failing_first(self, n: u32) -> Self {
        self.fail_first_calls.store(n, Ordering::Relaxed);
        self
    }

    pub fn failing_probe() -> Self {
        let mut svc = Self::new(Vec::new());
        svc.fail_probe = true;
        svc
    }

    /// Conversation histories seen so far, one per `stream_reply` call.
    pub async fn recorded_histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().await.clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    async fn probe(&self) -> Result<(), ProviderError> {
        if self.fail_probe {
            Err(ProviderError::rejected(
                ServiceKind::Generation,
                "scripted probe failure",
            ))
        } else {
            Ok(())
        }
    }

    async fn stream_reply(
        &self,
        history: &[Message],
    ) -> Result<Box<dyn ReplyStream>, ProviderError> {
        self.histories.lock().await.push(history.to_vec());

        let remaining = self.fail_first_calls.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_first_calls.store(remaining - 1, Ordering::Relaxed);
            return Err(ProviderError::transient(
                ServiceKind::Generation,
                "scripted transient generation failure",
            ));
        }

        let reply = self
            .replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::instant(&["Okay."]));
        Ok(Box::new(ScriptedReplyStream {
            tokens: reply.tokens.into(),
            token_delay: reply.token_delay,
        }))
    }
}

struct ScriptedReplyStream {
    tokens: VecDeque<String>,
    token_delay: Duration,
}

#[async_trait]
impl ReplyStream for ScriptedReplyStream {
    async fn next_token(&mut self) -> Result<Option<String>, ProviderError> {
        // Sleep before taking the token so an abandoned poll loses nothing.
        if self.tokens.is_empty() {
            return Ok(None);
        }
        tokio::time::sleep(self.token_delay).await;
        Ok(self.tokens.pop_front())
    }
}

/// Behavior knobs for the scripted synthesis provider.
#[derive(Debug, Clone)]
pub struct SynthesisScript {
    /// Simulated handshake cost for `open_connection`.
    pub connect_delay: Duration,
    /// Refuse every `open_connection` outright.
    pub refuse_connections: bool,
    /// Fail this many `open_connection` calls with a transient error first.
    pub fail_first_connects: u32,
    /// Delay before each audio span is handed back on the stream.
    pub chunk_delay: Duration,
    /// Buffer submitted spans and emit them as one chunk on `flush`, like a
    /// provider that re-segments text on its side.
    pub coalesce_spans: bool,
    /// Simulated round-trip for `synthesize_once`.
    pub oneshot_delay: Duration,
    /// Fail every `synthesize_once` call.
    pub fail_oneshot: bool,
    pub fail_probe: bool,
}

impl Default for SynthesisScript {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(5),
            refuse_connections: false,
            fail_first_connects: 0,
            chunk_delay: Duration::ZERO,
            coalesce_spans: false,
            oneshot_delay: Duration::from_millis(5),
            fail_oneshot: false,
            fail_probe: false,
        }
    }
}

/// Scripted text-to-speech provider. Audio payloads are the UTF-8 bytes of
/// the submitted text.
pub struct ScriptedSynthesis {
    script: SynthesisScript,
    connects_remaining_to_fail: AtomicU32,
    opens: AtomicU32,
    oneshot_calls: AtomicU32,
}

impl Default for ScriptedSynthesis {
    fn default() -> Self {
        Self::new(SynthesisScript::default())
    }
}

impl ScriptedSynthesis {
    pub fn new(script: SynthesisScript) -> Self {
        Self {
            connects_remaining_to_fail: AtomicU32::new(script.fail_first_connects),
            opens: AtomicU32::new(0),
            oneshot_calls: AtomicU32::new(0),
            script,
        }
    }

    /// Number of streaming connections opened.
    pub fn connections_opened(&self) -> u32 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Number of one-shot (fallback path) synthesis calls.
    pub fn oneshot_calls(&self) -> u32 {
        self.oneshot_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SynthesisService for ScriptedSynthesis {
    async fn probe(&self) -> Result<(), ProviderError> {
        if self.script.fail_probe {
            Err(ProviderError::rejected(
                ServiceKind::Synthesis,
                "scripted probe failure",
            ))
        } else {
            Ok(())
        }
    }

    async fn open_connection(&self) -> Result<Box<dyn SynthesisConnection>, ProviderError> {
        tokio::time::sleep(self.script.connect_delay).await;

        if self.script.refuse_connections {
            return Err(ProviderError::rejected(
                ServiceKind::Synthesis,
                "scripted connection refusal",
            ));
        }

        let remaining = self.connects_remaining_to_fail.load(Ordering::Relaxed);
        if remaining > 0 {
            self.connects_remaining_to_fail
                .store(remaining - 1, Ordering::Relaxed);
            return Err(ProviderError::transient(
                ServiceKind::Synthesis,
                "scripted transient connect failure",
            ));
        }

        self.opens.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(ScriptedSynthesisConnection {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            chunk_delay: self.script.chunk_delay,
            coalesce: self.script.coalesce_spans,
            buffer: Mutex::new(String::new()),
        }))
    }

    async fn synthesize_once(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        self.oneshot_calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.script.oneshot_delay).await;
        if self.script.fail_oneshot {
            return Err(ProviderError::transient(
                ServiceKind::Synthesis,
                "scripted one-shot failure",
            ));
        }
        Ok(text.as_bytes().to_vec())
    }
}

struct ScriptedSynthesisConnection {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    chunk_delay: Duration,
    coalesce: bool,
    buffer: Mutex<String>,
}

impl ScriptedSynthesisConnection {
    async fn emit(&self, payload: Vec<u8>) -> Result<(), ProviderError> {
        let guard = self.tx.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.send(payload).map_err(|_| {
                ProviderError::transient(ServiceKind::Synthesis, "connection closed")
            }),
            None => Err(ProviderError::transient(
                ServiceKind::Synthesis,
                "connection closed",
            )),
        }
    }
}

#[async_trait]
impl SynthesisConnection for ScriptedSynthesisConnection {
    async fn send_text(&self, text: &str) -> Result<(), ProviderError> {
        if self.coalesce {
            if self.tx.lock().await.is_none() {
                return Err(ProviderError::transient(
                    ServiceKind::Synthesis,
                    "connection closed",
                ));
            }
            self.buffer.lock().await.push_str(text);
            return Ok(());
        }
        self.emit(text.as_bytes().to_vec()).await
    }

    async fn flush(&self) -> Result<(), ProviderError> {
        if self.coalesce {
            let text = std::mem::take(&mut *self.buffer.lock().await);
            if !text.is_empty() {
                self.emit(text.into_bytes()).await?;
            }
        }
        Ok(())
    }

    async fn next_audio(&self) -> Result<Option<Vec<u8>>, ProviderError> {
        // Delay first so an abandoned poll never discards a chunk; `recv`
        // itself is cancel-safe.
        if !self.chunk_delay.is_zero() {
            tokio::time::sleep(self.chunk_delay).await;
        }
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) {
        self.tx.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_stream_replays_events_in_order() {
        let service = ScriptedTranscription::new(vec![
            TimedTranscript::after(
                Duration::ZERO,
                TranscriptEvent::Partial {
                    text: "hel".to_string(),
                },
            ),
            TimedTranscript::after(
                Duration::ZERO,
                TranscriptEvent::Final {
                    text: "hello".to_string(),
                },
            ),
            TimedTranscript::after(Duration::ZERO, TranscriptEvent::UtteranceEnd),
        ]);

        let stream = service.open_stream().await.unwrap();
        stream.send_audio(&[0u8; 160]).await.unwrap();

        assert!(matches!(
            stream.next_event().await.unwrap(),
            Some(TranscriptEvent::Partial { .. })
        ));
        assert!(matches!(
            stream.next_event().await.unwrap(),
            Some(TranscriptEvent::Final { .. })
        ));
        assert!(matches!(
            stream.next_event().await.unwrap(),
            Some(TranscriptEvent::UtteranceEnd)
        ));
        assert!(stream.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scripted_generation_records_history_and_streams_tokens() {
        let service = ScriptedGeneration::new(vec![ScriptedReply::instant(&["Hi", " there"])]);
        let history = vec![Message::system("sys"), Message::user("Hello")];

        let mut reply = service.stream_reply(&history).await.unwrap();
        assert_eq!(reply.next_token().await.unwrap().as_deref(), Some("Hi"));
        assert_eq!(reply.next_token().await.unwrap().as_deref(), Some(" there"));
        assert!(reply.next_token().await.unwrap().is_none());

        let recorded = service.recorded_histories().await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], history);
    }

    #[tokio::test]
    async fn synthesis_connection_returns_audio_in_submission_order() {
        let service = ScriptedSynthesis::default();
        let conn = service.open_connection().await.unwrap();

        conn.send_text("first").await.unwrap();
        conn.send_text("second").await.unwrap();

        assert_eq!(conn.next_audio().await.unwrap().unwrap(), b"first");
        assert_eq!(conn.next_audio().await.unwrap().unwrap(), b"second");

        conn.close().await;
        assert!(conn.next_audio().await.unwrap().is_none());
        assert!(conn.send_text("late").await.is_err());
    }
}
