//! End-to-end pipeline runs over scripted providers and a channel transport.

use parlance_pipeline::{
    ChannelTransport, PipelineConfig, PipelineEnd, SessionPipeline, SynthesisPath,
};
use parlance_providers::scripted::{
    ScriptedGeneration, ScriptedReply, ScriptedSynthesis, ScriptedTranscription, SynthesisScript,
    TimedTranscript,
};
use parlance_providers::{SynthesisConnection, SynthesisService, TranscriptionService};
use parlance_types::{AudioChunk, Role, TranscriptEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn test_config() -> PipelineConfig {
    PipelineConfig {
        silence_timeout_ms: 200,
        stage_timeout_ms: 2_000,
        retry_backoff_ms: 10,
        system_prompt: "You are a concise voice assistant.".to_string(),
        greeting: None,
        fallback_reply: "Sorry, something went wrong on my end.".to_string(),
    }
}

fn spoken(events: &[(&str, u64)]) -> Vec<TimedTranscript> {
    let mut script = Vec::new();
    for (text, delay_ms) in events {
        script.push(TimedTranscript::after(
            Duration::from_millis(*delay_ms),
            TranscriptEvent::Final {
                text: text.to_string(),
            },
        ));
        script.push(TimedTranscript::after(
            Duration::ZERO,
            TranscriptEvent::UtteranceEnd,
        ));
    }
    script
}

async fn run_call(
    events: Vec<TimedTranscript>,
    generation: Arc<ScriptedGeneration>,
    synthesis: Arc<ScriptedSynthesis>,
    config: PipelineConfig,
    streaming: bool,
) -> (PipelineEnd, Vec<AudioChunk>) {
    let transcription = ScriptedTranscription::new(events);
    let stream = transcription.open_stream().await.unwrap();

    let path = if streaming {
        let connection: Arc<dyn SynthesisConnection> =
            Arc::from(synthesis.open_connection().await.unwrap());
        SynthesisPath::Streaming {
            connection,
            service: synthesis.clone(),
        }
    } else {
        SynthesisPath::OneShot {
            service: synthesis.clone(),
        }
    };

    let (transport, mut caller) = ChannelTransport::pair();
    // No caller audio in these runs; the scripted recognizer drives turns.
    drop(caller.audio_in);

    let pipeline = SessionPipeline::new(config, stream, generation, path, Arc::new(transport));
    let end = pipeline.run(CancellationToken::new()).await;

    let mut audio = Vec::new();
    while let Ok(chunk) = caller.audio_out.try_recv() {
        audio.push(chunk);
    }
    (end, audio)
}

fn transcript_of(audio: &[AudioChunk]) -> String {
    audio
        .iter()
        .map(|chunk| String::from_utf8_lossy(&chunk.payload).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn replies_come_back_in_turn_order() {
    let generation = Arc::new(ScriptedGeneration::new(vec![
        ScriptedReply::instant(&["Hi", " there."]),
        ScriptedReply::instant(&["Doing", " well."]),
    ]));
    let synthesis = Arc::new(ScriptedSynthesis::default());

    let (end, audio) = run_call(
        spoken(&[("hello", 0), ("how are you", 0)]),
        generation,
        synthesis,
        test_config(),
        true,
    )
    .await;

    assert!(matches!(end, PipelineEnd::InputEnded));
    let turns: Vec<u64> = audio.iter().map(|chunk| chunk.turn).collect();
    let mut sorted = turns.clone();
    sorted.sort_unstable();
    assert_eq!(turns, sorted, "audio arrived out of turn order: {turns:?}");

    let spoken_text = transcript_of(&audio);
    assert!(spoken_text.contains("Hi there."));
    assert!(spoken_text.contains("Doing well."));
}

#[tokio::test]
async fn single_turn_reply_is_never_dropped() {
    // A one-token reply leaves no slack: if any token is lost between the
    // utterance finalizing and the reply stream draining, the caller gets
    // silence. Loop to shake out scheduling-dependent interleavings.
    for run in 0..50 {
        let generation = Arc::new(ScriptedGeneration::new(vec![ScriptedReply::instant(&[
            "All good.",
        ])]));
        let synthesis = Arc::new(ScriptedSynthesis::default());

        let (end, audio) = run_call(
            spoken(&[("hello", 0)]),
            generation,
            synthesis,
            test_config(),
            true,
        )
        .await;

        assert!(matches!(end, PipelineEnd::InputEnded));
        assert_eq!(
            transcript_of(&audio),
            "All good.",
            "reply audio lost on run {run}"
        );
    }
}

#[tokio::test]
async fn greeting_leads_the_first_reply() {
    let generation = Arc::new(ScriptedGeneration::new(vec![ScriptedReply::instant(&[
        "How can I help?",
    ])]));
    let synthesis = Arc::new(ScriptedSynthesis::default());

    let mut config = test_config();
    config.greeting = Some("Welcome to the clinic!".to_string());

    let (_, audio) = run_call(
        spoken(&[("hello", 0)]),
        generation.clone(),
        synthesis,
        config,
        true,
    )
    .await;

    assert!(!audio.is_empty());
    assert_eq!(audio[0].payload, b"Welcome to the clinic!");

    // The model sees the greeting as something it already said.
    let histories = generation.recorded_histories().await;
    let first = &histories[0];
    assert_eq!(first[0].role, Role::System);
    assert_eq!(first[1].role, Role::Assistant);
    assert_eq!(first[1].content, "Welcome to the clinic!");
    assert_eq!(first[2].role, Role::User);
    assert_eq!(first[2].content, "hello");
}

#[tokio::test]
async fn audio_starts_before_the_reply_finishes_generating() {
    // Ten paced tokens take ~500ms to generate; the first clause closes on
    // token one, so its audio must arrive well before the stream ends.
    let mut tokens = vec!["Right away."];
    tokens.extend(std::iter::repeat(" more words").take(9));
    let generation = Arc::new(ScriptedGeneration::new(vec![ScriptedReply::paced(
        &tokens,
        Duration::from_millis(50),
    )]));
    let synthesis = Arc::new(ScriptedSynthesis::default());

    let transcription = ScriptedTranscription::new(spoken(&[("hello", 0)]));
    let stream = transcription.open_stream().await.unwrap();
    let connection: Arc<dyn SynthesisConnection> =
        Arc::from(synthesis.open_connection().await.unwrap());
    let (transport, mut caller) = ChannelTransport::pair();
    drop(caller.audio_in);

    let pipeline = SessionPipeline::new(
        test_config(),
        stream,
        generation,
        SynthesisPath::Streaming {
            connection,
            service: synthesis,
        },
        Arc::new(transport),
    );
    let run = tokio::spawn(pipeline.run(CancellationToken::new()));

    let first = tokio::time::timeout(Duration::from_millis(250), caller.audio_out.recv())
        .await
        .expect("first audio should arrive while generation is still streaming")
        .expect("audio channel closed early");
    assert_eq!(first.payload, b"Right away.");

    run.await.unwrap();
}

#[tokio::test]
async fn barge_in_abandons_the_stale_reply() {
    // Reply one would take ~1.5s to stream; the caller interrupts at 100ms.
    let long_tokens: Vec<&str> = std::iter::repeat("word. ").take(30).collect();
    let generation = Arc::new(ScriptedGeneration::new(vec![
        ScriptedReply::paced(&long_tokens, Duration::from_millis(50)),
        ScriptedReply::instant(&["Okay, stopping."]),
    ]));
    let synthesis = Arc::new(ScriptedSynthesis::default());

    let mut events = spoken(&[("tell me a long story", 0)]);
    events.push(TimedTranscript::after(
        Duration::from_millis(100),
        TranscriptEvent::SpeechStart,
    ));
    events.extend(spoken(&[("stop", 0)]));

    let (end, audio) = run_call(events, generation, synthesis, test_config(), true).await;
    assert!(matches!(end, PipelineEnd::InputEnded));

    let second_turn = audio
        .iter()
        .position(|chunk| chunk.turn == 1)
        .expect("the interrupting turn should have been answered");
    assert!(
        audio[second_turn..].iter().all(|chunk| chunk.turn >= 1),
        "stale first-turn audio dispatched after the barge-in"
    );
    assert!(transcript_of(&audio).contains("Okay, stopping."));
}

#[tokio::test]
async fn transient_generation_failure_is_retried_once() {
    let generation = Arc::new(
        ScriptedGeneration::new(vec![ScriptedReply::instant(&["All good."])]).failing_first(1),
    );
    let synthesis = Arc::new(ScriptedSynthesis::default());

    let (end, audio) = run_call(
        spoken(&[("hello", 0)]),
        generation.clone(),
        synthesis,
        test_config(),
        true,
    )
    .await;

    assert!(matches!(end, PipelineEnd::InputEnded));
    assert!(transcript_of(&audio).contains("All good."));
    assert_eq!(generation.recorded_histories().await.len(), 2);
}

#[tokio::test]
async fn generation_outage_gets_the_spoken_fallback() {
    // Both the attempt and its retry fail; the turn ends with the apology
    // and the call stays up.
    let generation = Arc::new(ScriptedGeneration::default().failing_first(2));
    let synthesis = Arc::new(ScriptedSynthesis::default());
    let config = test_config();
    let apology = config.fallback_reply.clone();

    let (end, audio) = run_call(
        spoken(&[("hello", 0)]),
        generation,
        synthesis,
        config,
        true,
    )
    .await;

    assert!(matches!(end, PipelineEnd::InputEnded));
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].payload, apology.as_bytes());
}

#[tokio::test]
async fn oneshot_path_synthesizes_per_span() {
    let generation = Arc::new(ScriptedGeneration::new(vec![ScriptedReply::instant(&[
        "Hi", " there.",
    ])]));
    let synthesis = Arc::new(ScriptedSynthesis::new(SynthesisScript::default()));

    let (end, audio) = run_call(
        spoken(&[("hello", 0)]),
        generation,
        synthesis.clone(),
        test_config(),
        false,
    )
    .await;

    assert!(matches!(end, PipelineEnd::InputEnded));
    assert_eq!(synthesis.connections_opened(), 0);
    assert!(synthesis.oneshot_calls() >= 1);
    assert!(transcript_of(&audio).contains("Hi there."));
}

#[tokio::test]
async fn merged_synthesis_chunks_do_not_mistag_the_next_turn() {
    // Each reply submits two clauses but the provider hands back a single
    // chunk per flush, so one pending tag per turn never matches audio. The
    // second turn's audio must still carry the second turn's tag.
    let generation = Arc::new(ScriptedGeneration::new(vec![
        ScriptedReply::instant(&["One.", " Two."]),
        ScriptedReply::instant(&["Three.", " Four."]),
    ]));
    let synthesis = Arc::new(ScriptedSynthesis::new(SynthesisScript {
        coalesce_spans: true,
        ..SynthesisScript::default()
    }));

    let mut config = test_config();
    config.stage_timeout_ms = 300;

    let (end, audio) = run_call(
        spoken(&[("first", 0), ("second", 0)]),
        generation,
        synthesis,
        config,
        true,
    )
    .await;

    assert!(matches!(end, PipelineEnd::InputEnded));
    assert_eq!(audio.len(), 2, "one merged chunk per reply expected");
    assert_eq!(audio[0].turn, 0);
    assert_eq!(audio[1].turn, 1, "second reply mis-tagged with a stale turn");
    let second = String::from_utf8_lossy(&audio[1].payload).into_owned();
    assert!(second.contains("Three") && second.contains("Four"));
}

#[tokio::test]
async fn silence_finalizes_an_utterance_without_an_endpoint_marker() {
    let generation = Arc::new(ScriptedGeneration::default());
    let synthesis = Arc::new(ScriptedSynthesis::default());

    // A partial with no endpointing marker, then a long quiet gap.
    let events = vec![
        TimedTranscript::after(
            Duration::ZERO,
            TranscriptEvent::Partial {
                text: "book me for tomorrow".to_string(),
            },
        ),
        TimedTranscript::after(Duration::from_secs(1), TranscriptEvent::UtteranceEnd),
    ];

    let (end, _) = run_call(events, generation.clone(), synthesis, test_config(), true).await;
    assert!(matches!(end, PipelineEnd::InputEnded));

    let histories = generation.recorded_histories().await;
    assert!(!histories.is_empty());
    let last_user = histories[0]
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .unwrap();
    assert_eq!(last_user.content, "book me for tomorrow");
}

#[tokio::test]
async fn empty_call_ends_cleanly_with_no_audio() {
    let generation = Arc::new(ScriptedGeneration::default());
    let synthesis = Arc::new(ScriptedSynthesis::default());

    let (end, audio) = run_call(Vec::new(), generation, synthesis, test_config(), true).await;

    assert!(matches!(end, PipelineEnd::InputEnded));
    assert!(audio.is_empty());
}
