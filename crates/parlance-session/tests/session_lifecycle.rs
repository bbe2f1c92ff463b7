//! Session lifecycle runs over scripted providers.

use parlance_pipeline::ChannelTransport;
use parlance_providers::scripted::{
    ScriptedGeneration, ScriptedReply, ScriptedSynthesis, ScriptedTranscription, SynthesisScript,
    TimedTranscript,
};
use parlance_providers::{ServiceClient, ServiceHandle, ServiceRegistry};
use parlance_session::{prompts, CallContext, CallSupervisor, Language, SessionConfig, SessionError};
use parlance_types::TranscriptEvent;
use std::sync::Arc;
use std::time::Duration;

fn one_utterance(text: &str) -> Vec<TimedTranscript> {
    vec![
        TimedTranscript::after(
            Duration::ZERO,
            TranscriptEvent::Final {
                text: text.to_string(),
            },
        ),
        TimedTranscript::after(Duration::ZERO, TranscriptEvent::UtteranceEnd),
    ]
}

/// A script that keeps the recognition stream open for a long while.
fn long_lived_script() -> Vec<TimedTranscript> {
    std::iter::repeat(TimedTranscript::after(
        Duration::from_secs(10),
        TranscriptEvent::SpeechStart,
    ))
    .take(50)
    .collect()
}

fn registry(
    script: Vec<TimedTranscript>,
    generation: Arc<ScriptedGeneration>,
    synthesis: Arc<ScriptedSynthesis>,
) -> Arc<ServiceRegistry> {
    Arc::new(ServiceRegistry::with_handles([
        ServiceHandle::new(
            "fp-stt",
            ServiceClient::Transcription(Arc::new(ScriptedTranscription::new(script))),
        ),
        ServiceHandle::new("fp-gen", ServiceClient::Generation(generation)),
        ServiceHandle::new("fp-tts", ServiceClient::Synthesis(synthesis)),
    ]))
}

fn quick_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.warmup_timeout_ms = 500;
    config.shutdown_grace_ms = 2_000;
    config.pipeline.silence_timeout_ms = 200;
    config.pipeline.retry_backoff_ms = 10;
    config
}

#[tokio::test]
async fn degraded_warmup_still_reaches_active_and_speaks() {
    let generation = Arc::new(ScriptedGeneration::new(vec![ScriptedReply::instant(&[
        "Hi there.",
    ])]));
    let synthesis = Arc::new(ScriptedSynthesis::new(SynthesisScript {
        refuse_connections: true,
        ..SynthesisScript::default()
    }));
    let registry = registry(one_utterance("hello"), generation, synthesis.clone());
    let supervisor = CallSupervisor::new(registry, quick_config());

    let (transport, mut caller) = ChannelTransport::pair();
    drop(caller.audio_in);
    supervisor.on_new_call(Arc::new(transport)).await.unwrap();

    let closed = tokio::time::timeout(
        Duration::from_secs(5),
        caller.closed.wait_for(|reason| reason.is_some()),
    )
    .await
    .expect("session should close")
    .unwrap()
    .clone();
    assert_eq!(closed.unwrap().code(), "remote_disconnect");

    // The fallback path spoke, not the refused streaming connection.
    assert_eq!(synthesis.connections_opened(), 0);
    assert!(synthesis.oneshot_calls() >= 1);

    let mut spoke_reply = false;
    while let Ok(chunk) = caller.audio_out.try_recv() {
        if chunk.payload == b"Hi there." {
            spoke_reply = true;
        }
    }
    assert!(spoke_reply, "no reply audio reached the caller");
}

#[tokio::test]
async fn capacity_cap_rejects_the_extra_call_only() {
    let generation = Arc::new(ScriptedGeneration::default());
    let synthesis = Arc::new(ScriptedSynthesis::default());
    let registry = registry(long_lived_script(), generation, synthesis);

    let mut config = quick_config();
    config.max_sessions = 2;
    let supervisor = CallSupervisor::new(registry, config);

    let (transport_a, caller_a) = ChannelTransport::pair();
    let (transport_b, caller_b) = ChannelTransport::pair();
    let (transport_c, _caller_c) = ChannelTransport::pair();

    supervisor.on_new_call(Arc::new(transport_a)).await.unwrap();
    supervisor.on_new_call(Arc::new(transport_b)).await.unwrap();

    let err = supervisor
        .on_new_call(Arc::new(transport_c))
        .await
        .expect_err("third call should be refused");
    assert!(matches!(err, SessionError::CapacityExceeded { limit: 2 }));

    // The refusal left the admitted sessions untouched.
    assert_eq!(supervisor.active_sessions().await, 2);
    assert!(caller_a.closed.borrow().is_none());
    assert!(caller_b.closed.borrow().is_none());

    supervisor.shutdown().await;
    assert_eq!(supervisor.active_sessions().await, 0);
}

#[tokio::test]
async fn shutdown_drains_sessions_with_server_shutdown() {
    let generation = Arc::new(ScriptedGeneration::default());
    let synthesis = Arc::new(ScriptedSynthesis::default());
    let registry = registry(long_lived_script(), generation, synthesis);
    let supervisor = CallSupervisor::new(registry, quick_config());

    let (transport, caller) = ChannelTransport::pair();
    supervisor.on_new_call(Arc::new(transport)).await.unwrap();

    supervisor.shutdown().await;

    let closed = caller.closed.borrow().clone();
    assert_eq!(closed.unwrap().code(), "server_shutdown");

    let err = supervisor
        .on_new_call(Arc::new(ChannelTransport::pair().0))
        .await
        .expect_err("admission after shutdown should fail");
    assert!(matches!(err, SessionError::ShuttingDown));
}

#[tokio::test]
async fn greeting_respects_the_configured_language() {
    let generation = Arc::new(ScriptedGeneration::default());
    let synthesis = Arc::new(ScriptedSynthesis::default());
    let registry = registry(one_utterance("नमस्ते"), generation, synthesis);

    let mut config = quick_config();
    config.context = CallContext {
        app_name: "Asha".to_string(),
        client_name: "Sunrise Clinic".to_string(),
        language: Language::Hindi,
    };
    let expected_greeting = prompts::greeting(&config.context);
    let supervisor = CallSupervisor::new(registry, config);

    let (transport, mut caller) = ChannelTransport::pair();
    drop(caller.audio_in);
    supervisor.on_new_call(Arc::new(transport)).await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        caller.closed.wait_for(|reason| reason.is_some()),
    )
    .await
    .expect("session should close")
    .unwrap();

    let first = caller.audio_out.try_recv().expect("greeting audio missing");
    assert_eq!(first.payload, expected_greeting.as_bytes());
}
