//! Network-backed provider clients.
//!
//! REST calls (probes, one-shot synthesis) go through `reqwest`; the
//! streaming surfaces (recognition, persistent synthesis) are WebSocket
//! connections via `tokio-tungstenite`. The generation provider streams its
//! reply as server-sent-event lines over a chunked HTTP response.
//!
//! Wire contracts, kept deliberately small:
//! - recognition socket: binary frames carry caller audio up; text frames
//!   down are JSON `{"type": "partial"|"final"|"utterance_end"|"speech_start",
//!   "text": "..."}`.
//! - generation: `POST {endpoint}/chat` with the history, response body is
//!   `data: {"token": "..."}` lines ending with `data: [DONE]`.
//! - synthesis socket: text frames up are JSON `{"text": "..."}` or
//!   `{"flush": true}`; binary frames down carry audio in submission order.

use crate::config::{GenerationConfig, SynthesisConfig, TranscriptionConfig};
use crate::error::ProviderError;
use crate::traits::{
    GenerationService, ReplyStream, SynthesisConnection, SynthesisService, TranscriptionService,
    TranscriptionStream,
};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parlance_types::{Message as ChatMessage, ServiceKind, TranscriptEvent};
use serde::Deserialize;
use serde_json::json;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Per-request deadline for REST calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

fn transport_error(kind: ServiceKind, err: reqwest::Error) -> ProviderError {
    ProviderError::transient(kind, err.to_string())
}

async fn ws_connect(
    kind: ServiceKind,
    endpoint: &str,
    api_key: &str,
) -> Result<(WsSink, WsSource), ProviderError> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| ProviderError::rejected(kind, format!("bad stream endpoint: {e}")))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| ProviderError::rejected(kind, format!("bad credential: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (socket, _response) = connect_async(request)
        .await
        .map_err(|e| ProviderError::transient(kind, format!("websocket connect: {e}")))?;
    Ok(socket.split())
}

async fn probe_endpoint(
    kind: ServiceKind,
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
) -> Result<(), ProviderError> {
    let response = client
        .get(url)
        .bearer_auth(api_key)
        .send()
        .await
        .map_err(|e| transport_error(kind, e))?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(kind, status, body))
    }
}

// --- transcription ---------------------------------------------------------

pub struct HttpTranscriptionService {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

impl HttpTranscriptionService {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn stream_url(&self) -> String {
        let mut url = format!(
            "{}?model={}",
            self.config.stream_endpoint, self.config.model
        );
        if let Some(locale) = &self.config.locale {
            url.push_str("&locale=");
            url.push_str(locale);
        }
        url
    }
}

#[derive(Deserialize)]
struct RecognitionFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionService {
    async fn probe(&self) -> Result<(), ProviderError> {
        probe_endpoint(
            ServiceKind::Transcription,
            &self.client,
            &self.config.endpoint,
            &self.config.api_key,
        )
        .await
    }

    async fn open_stream(&self) -> Result<Box<dyn TranscriptionStream>, ProviderError> {
        let (sink, source) = ws_connect(
            ServiceKind::Transcription,
            &self.stream_url(),
            &self.config.api_key,
        )
        .await?;
        Ok(Box::new(WsTranscriptionStream {
            sink: Mutex::new(sink),
            source: Mutex::new(source),
        }))
    }
}

struct WsTranscriptionStream {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
}

#[async_trait]
impl TranscriptionStream for WsTranscriptionStream {
    async fn send_audio(&self, payload: &[u8]) -> Result<(), ProviderError> {
        self.sink
            .lock()
            .await
            .send(WsMessage::binary(payload.to_vec()))
            .await
            .map_err(|e| ProviderError::transient(ServiceKind::Transcription, e.to_string()))
    }

    async fn next_event(&self) -> Result<Option<TranscriptEvent>, ProviderError> {
        let mut source = self.source.lock().await;
        while let Some(message) = source.next().await {
            let message = message.map_err(|e| {
                ProviderError::transient(ServiceKind::Transcription, e.to_string())
            })?;
            let frame: RecognitionFrame = match message {
                WsMessage::Text(text) => serde_json::from_str(text.as_str()).map_err(|e| {
                    ProviderError::transient(
                        ServiceKind::Transcription,
                        format!("malformed recognition frame: {e}"),
                    )
                })?,
                WsMessage::Close(_) => return Ok(None),
                // Pings are handled by the library; anything else is noise.
                _ => continue,
            };
            let event = match frame.kind.as_str() {
                "partial" => TranscriptEvent::Partial { text: frame.text },
                "final" => TranscriptEvent::Final { text: frame.text },
                "utterance_end" => TranscriptEvent::UtteranceEnd,
                "speech_start" => TranscriptEvent::SpeechStart,
                other => {
                    tracing::debug!(kind = other, "ignoring unknown recognition frame");
                    continue;
                }
            };
            return Ok(Some(event));
        }
        Ok(None)
    }

    async fn finish(&self) -> Result<(), ProviderError> {
        self.sink
            .lock()
            .await
            .send(WsMessage::text(json!({"finish": true}).to_string()))
            .await
            .map_err(|e| ProviderError::transient(ServiceKind::Transcription, e.to_string()))
    }
}

// --- generation ------------------------------------------------------------

pub struct HttpGenerationService {
    config: GenerationConfig,
    client: reqwest::Client,
}

impl HttpGenerationService {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn probe(&self) -> Result<(), ProviderError> {
        probe_endpoint(
            ServiceKind::Generation,
            &self.client,
            &self.config.endpoint,
            &self.config.api_key,
        )
        .await
    }

    async fn stream_reply(
        &self,
        history: &[ChatMessage],
    ) -> Result<Box<dyn ReplyStream>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "temperature": self.config.temperature,
                "stream": true,
                "messages": history,
            }))
            .send()
            .await
            .map_err(|e| transport_error(ServiceKind::Generation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                ServiceKind::Generation,
                status,
                body,
            ));
        }

        Ok(Box::new(SseReplyStream {
            body: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            done: false,
        }))
    }
}

#[derive(Deserialize)]
struct TokenFrame {
    token: String,
}

struct SseReplyStream {
    body: Pin<Box<dyn futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    buffer: String,
    done: bool,
}

impl SseReplyStream {
    /// Pops the next complete `data:` line out of the buffer, if any.
    fn next_data_line(&mut self) -> Option<String> {
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                return Some(data.trim().to_string());
            }
        }
        None
    }
}

#[async_trait]
impl ReplyStream for SseReplyStream {
    async fn next_token(&mut self) -> Result<Option<String>, ProviderError> {
        loop {
            if self.done {
                return Ok(None);
            }
            if let Some(data) = self.next_data_line() {
                if data == "[DONE]" {
                    self.done = true;
                    return Ok(None);
                }
                let frame: TokenFrame = serde_json::from_str(&data).map_err(|e| {
                    ProviderError::transient(
                        ServiceKind::Generation,
                        format!("malformed token frame: {e}"),
                    )
                })?;
                return Ok(Some(frame.token));
            }
            match self.body.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| transport_error(ServiceKind::Generation, e))?;
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                None => {
                    // Stream ended without the [DONE] marker; treat whatever
                    // arrived as the complete reply.
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}

// --- synthesis -------------------------------------------------------------

pub struct HttpSynthesisService {
    config: SynthesisConfig,
    client: reqwest::Client,
}

impl HttpSynthesisService {
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}?voice_id={}",
            self.config.stream_endpoint, self.config.voice_id
        )
    }
}

#[async_trait]
impl SynthesisService for HttpSynthesisService {
    async fn probe(&self) -> Result<(), ProviderError> {
        probe_endpoint(
            ServiceKind::Synthesis,
            &self.client,
            &format!("{}/voices/{}", self.config.endpoint, self.config.voice_id),
            &self.config.api_key,
        )
        .await
    }

    async fn open_connection(&self) -> Result<Box<dyn SynthesisConnection>, ProviderError> {
        let (sink, source) = ws_connect(
            ServiceKind::Synthesis,
            &self.stream_url(),
            &self.config.api_key,
        )
        .await?;
        Ok(Box::new(WsSynthesisConnection {
            sink: Mutex::new(Some(sink)),
            source: Mutex::new(source),
        }))
    }

    async fn synthesize_once(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/synthesize", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "voice_id": self.config.voice_id, "text": text }))
            .send()
            .await
            .map_err(|e| transport_error(ServiceKind::Synthesis, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                ServiceKind::Synthesis,
                status,
                body,
            ));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| transport_error(ServiceKind::Synthesis, e))?;
        Ok(audio.to_vec())
    }
}

struct WsSynthesisConnection {
    sink: Mutex<Option<WsSink>>,
    source: Mutex<WsSource>,
}

impl WsSynthesisConnection {
    async fn send_frame(&self, frame: serde_json::Value) -> Result<(), ProviderError> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(WsMessage::text(frame.to_string()))
                .await
                .map_err(|e| ProviderError::transient(ServiceKind::Synthesis, e.to_string())),
            None => Err(ProviderError::transient(
                ServiceKind::Synthesis,
                "connection closed",
            )),
        }
    }
}

#[async_trait]
impl SynthesisConnection for WsSynthesisConnection {
    async fn send_text(&self, text: &str) -> Result<(), ProviderError> {
        self.send_frame(json!({ "text": text })).await
    }

    async fn flush(&self) -> Result<(), ProviderError> {
        self.send_frame(json!({ "flush": true })).await
    }

    async fn next_audio(&self) -> Result<Option<Vec<u8>>, ProviderError> {
        let mut source = self.source.lock().await;
        while let Some(message) = source.next().await {
            match message
                .map_err(|e| ProviderError::transient(ServiceKind::Synthesis, e.to_string()))?
            {
                WsMessage::Binary(audio) => return Ok(Some(audio.to_vec())),
                WsMessage::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
        }
    }
}
