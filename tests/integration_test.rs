/// Integration tests exercising the full pipeline against a deterministic
/// stub transcriber, matching the end-to-end scenarios in spec §8.
use std::sync::Arc;
use std::time::Duration;

use cumulative_stt::config::AppConfig;
use cumulative_stt::normalizer::KanaNormalizer;
use cumulative_stt::registry::SessionRegistry;
use cumulative_stt::scheduler::{PipelineScheduler, SchedulerEvent};
use cumulative_stt::session::SessionState;
use cumulative_stt::transcriber::StubTranscriber;
use cumulative_stt::translator::StubTranslator;
use tokio::sync::{mpsc, Semaphore};

fn pcm_fixture(n_samples: usize) -> Vec<u8> {
    // Deterministic, distinguishable-by-length fixture data; every byte
    // pattern is a valid 16-bit-aligned PCM frame.
    (0..n_samples)
        .flat_map(|i| (i as i16).to_le_bytes())
        .collect()
}

async fn drain_events(rx: &mut mpsc::UnboundedReceiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
    {
        out.push(event);
    }
    out
}

struct Harness {
    session: Arc<tokio::sync::Mutex<SessionState>>,
    scheduler: Arc<PipelineScheduler>,
    stub: Arc<StubTranscriber>,
    events_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
}

fn build_harness() -> Harness {
    let config = AppConfig::default();
    let session = Arc::new(tokio::sync::Mutex::new(SessionState::new(
        config.max_audio_bytes(),
        config.overlap_bytes(),
        config.prompt_max_chars,
    )));
    let stub = Arc::new(StubTranscriber::new());
    let normalizer = Arc::new(KanaNormalizer::new());
    let translator = Arc::new(StubTranslator::new());
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let scheduler = PipelineScheduler::new(
        Arc::clone(&session),
        stub.clone() as Arc<dyn cumulative_stt::transcriber::Transcriber>,
        normalizer,
        translator,
        config,
        events_tx,
        Arc::new(Semaphore::new(1)),
    );

    Harness {
        session,
        scheduler,
        stub,
        events_rx,
    }
}

#[tokio::test]
async fn test_single_chunk_no_options() {
    let mut h = build_harness();
    let pcm_a = pcm_fixture(48_000); // 3s @ 16kHz
    h.stub.register(pcm_a.clone(), "こんにちは。");

    h.session.lock().await.buffer.append(pcm_a).unwrap();
    h.scheduler.on_chunk_appended().await;

    let events = drain_events(&mut h.events_rx).await;
    let update = events
        .iter()
        .find_map(|e| match e {
            SchedulerEvent::TranscriptionUpdate { transcription, .. } => Some(transcription),
            _ => None,
        })
        .expect("expected a transcription_update");
    assert_eq!(update.confirmed, "こんにちは。");
    assert_eq!(update.tentative, "");

    h.scheduler.finalize().await;
    let events = drain_events(&mut h.events_rx).await;
    let end = events
        .iter()
        .find_map(|e| match e {
            SchedulerEvent::SessionEnd { transcription, .. } => Some(transcription),
            _ => None,
        })
        .expect("expected a session_end");
    assert_eq!(end.confirmed, "こんにちは。");
}

#[tokio::test]
async fn test_two_chunks_growth() {
    let mut h = build_harness();
    let pcm_a = pcm_fixture(48_000);
    let mut pcm_ab = pcm_a.clone();
    pcm_ab.extend(pcm_fixture(16_000));

    h.stub.register(pcm_a.clone(), "こんにちは");
    h.stub.register(pcm_ab.clone(), "こんにちは。さようなら");

    h.session.lock().await.buffer.append(pcm_a).unwrap();
    h.scheduler.on_chunk_appended().await;
    let first = drain_events(&mut h.events_rx).await;
    let first_update = first
        .iter()
        .find_map(|e| match e {
            SchedulerEvent::TranscriptionUpdate { transcription, .. } => Some(transcription),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_update.confirmed, "");
    assert_eq!(first_update.tentative, "こんにちは");

    h.session
        .lock()
        .await
        .buffer
        .append(pcm_fixture(16_000))
        .unwrap();
    h.scheduler.on_chunk_appended().await;
    let second = drain_events(&mut h.events_rx).await;
    let second_update = second
        .iter()
        .find_map(|e| match e {
            SchedulerEvent::TranscriptionUpdate { transcription, .. } => Some(transcription),
            _ => None,
        })
        .unwrap();
    assert_eq!(second_update.confirmed, "こんにちは。");
    assert_eq!(second_update.tentative, "さようなら");
}

#[tokio::test]
async fn test_revision_does_not_regress_confirmed() {
    let mut h = build_harness();
    let pcm_a = pcm_fixture(48_000);
    let mut pcm_ab = pcm_a.clone();
    pcm_ab.extend(pcm_fixture(16_000));

    h.stub.register(pcm_a.clone(), "あいう");
    h.stub.register(pcm_ab.clone(), "あいえお");

    h.session.lock().await.buffer.append(pcm_a).unwrap();
    h.scheduler.on_chunk_appended().await;
    drain_events(&mut h.events_rx).await;

    h.session
        .lock()
        .await
        .buffer
        .append(pcm_fixture(16_000))
        .unwrap();
    h.scheduler.on_chunk_appended().await;
    let events = drain_events(&mut h.events_rx).await;
    let update = events
        .iter()
        .find_map(|e| match e {
            SchedulerEvent::TranscriptionUpdate { transcription, .. } => Some(transcription),
            _ => None,
        })
        .unwrap();
    assert_eq!(update.confirmed, "");
    assert_eq!(update.tentative, "あいえお");
}

#[tokio::test]
async fn test_options_mid_stream_enables_translation() {
    let mut h = build_harness();
    let pcm_a = pcm_fixture(48_000);
    h.stub.register(pcm_a.clone(), "こんにちは。");

    h.session.lock().await.buffer.append(pcm_a).unwrap();
    h.scheduler.on_chunk_appended().await;
    drain_events(&mut h.events_rx).await;

    h.session.lock().await.options.enable_translation = true;

    let mut pcm_ab = pcm_fixture(48_000);
    pcm_ab.extend(pcm_fixture(16_000));
    h.stub
        .register(pcm_ab.clone(), "こんにちは。さようなら。");
    h.session
        .lock()
        .await
        .buffer
        .append(pcm_fixture(16_000))
        .unwrap();
    h.scheduler.on_chunk_appended().await;

    let events = drain_events(&mut h.events_rx).await;
    let has_translation = events.iter().any(|e| {
        matches!(
            e,
            SchedulerEvent::TranscriptionUpdate {
                translation: Some(_),
                ..
            }
        )
    });
    assert!(has_translation, "expected a translation-bearing update");
}

#[tokio::test]
async fn test_finalization_timeout_promotes_tentative() {
    let config = AppConfig {
        finalization_timeout: Duration::from_millis(50),
        ..AppConfig::default()
    };
    let session = Arc::new(tokio::sync::Mutex::new(SessionState::new(
        config.max_audio_bytes(),
        config.overlap_bytes(),
        config.prompt_max_chars,
    )));
    let stub = Arc::new(StubTranscriber::with_delay(Duration::from_secs(5)));
    let normalizer = Arc::new(KanaNormalizer::new());
    let translator = Arc::new(StubTranslator::new());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let scheduler = PipelineScheduler::new(
        Arc::clone(&session),
        stub.clone() as Arc<dyn cumulative_stt::transcriber::Transcriber>,
        normalizer,
        translator,
        config,
        events_tx,
        Arc::new(Semaphore::new(1)),
    );

    session
        .lock()
        .await
        .buffer
        .append(pcm_fixture(48_000))
        .unwrap();

    scheduler.finalize().await;

    let events = drain_events(&mut events_rx).await;
    let end = events
        .iter()
        .find_map(|e| match e {
            SchedulerEvent::SessionEnd { performance, .. } => Some(performance),
            _ => None,
        })
        .expect("expected a session_end even on timeout");
    assert!(end.finalization_timed_out);
}

#[tokio::test]
async fn test_session_registry_roundtrip() {
    let registry = SessionRegistry::new(Duration::from_secs(1800));
    let session = SessionState::new(30 * 16_000 * 2, 5 * 16_000 * 2, 224);
    let (id, _) = registry.create(session).await;
    assert!(registry.get(id).await.is_some());
    registry.destroy(id).await;
    assert!(registry.get(id).await.is_none());
}
