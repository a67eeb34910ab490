//! End-to-end update-processing scenarios over in-process backends.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use translive::config::{OracleConfig, RelayConfig};
use translive::gateway::events::{ServerEvent, TranscriptionUpdate};
use translive::oracle::StartTimeOracle;
use translive::orchestrator::SessionOrchestrator;
use translive::rooms::RoomRegistry;
use translive::segment::{Segment, TranscriptView};
use translive::store::{KeywordStore, MemoryCache, MemoryDurable, TranscriptStore};
use translive::stt::SttTranscript;
use translive::translate::{SegmentProcessor, TranslationPipeline};

struct Relay {
    orchestrator: Arc<SessionOrchestrator>,
    rooms: Arc<RoomRegistry<ServerEvent>>,
    transcripts: Arc<TranscriptStore>,
}

fn build(processor: Option<Arc<dyn SegmentProcessor>>) -> Relay {
    let cache = Arc::new(MemoryCache::new());
    let durable = Arc::new(MemoryDurable::new());
    let transcripts = Arc::new(TranscriptStore::new(cache.clone(), durable));
    let processor = processor.unwrap_or_else(|| {
        // No API key: the pipeline passes segments through untouched.
        Arc::new(TranslationPipeline::new(
            None,
            Vec::new(),
            KeywordStore::new(cache, Vec::new()),
        ))
    });
    let rooms = Arc::new(RoomRegistry::new());
    let orchestrator = SessionOrchestrator::new(
        RelayConfig::default(),
        reqwest::Client::new(),
        Arc::clone(&transcripts),
        processor,
        Arc::new(StartTimeOracle::new(
            reqwest::Client::new(),
            OracleConfig::default(),
        )),
        Arc::clone(&rooms),
    );
    Relay {
        orchestrator,
        rooms,
        transcripts,
    }
}

fn subscribe(relay: &Relay, room: &str, client: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    relay.rooms.enter(room, client, tx);
    rx
}

fn update(event: ServerEvent) -> TranscriptionUpdate {
    match event {
        ServerEvent::TranscriptionUpdate(update) => update,
        other => panic!("expected transcription_update, got {other:?}"),
    }
}

fn commit(start: f64, text: &str) -> Segment {
    Segment::with_text(false, start, start + 1.0, text)
}

#[tokio::test]
async fn commits_are_stored_ordered_and_broadcast_in_processing_order() {
    let relay = build(None);
    let mut rx = subscribe(&relay, "s1", "a");

    for start in [1.0, 3.0, 2.0] {
        relay.orchestrator.process_update("s1", commit(start, "x")).await;
    }

    let view = relay.transcripts.get("s1").await;
    let starts: Vec<f64> = view.committed.iter().map(|s| s.start_time).collect();
    assert_eq!(starts, vec![1.0, 2.0, 3.0]);

    // Broadcasts arrive in processing order, each carrying the committed
    // tail as of its own insert.
    let first = update(rx.recv().await.unwrap());
    assert_eq!(first.segment.start_time, 1.0);
    assert_eq!(first.last_committed.unwrap().start_time, 1.0);

    let second = update(rx.recv().await.unwrap());
    assert_eq!(second.segment.start_time, 3.0);
    assert_eq!(second.last_committed.unwrap().start_time, 3.0);

    let third = update(rx.recv().await.unwrap());
    assert_eq!(third.segment.start_time, 2.0);
    // The 2.0 insert lands behind 3.0: the tail stays at 3.0.
    assert_eq!(third.last_committed.unwrap().start_time, 3.0);
}

#[tokio::test]
async fn partial_is_superseded_by_commit_at_same_start_time() {
    let relay = build(None);

    relay
        .orchestrator
        .process_update("s1", Segment::with_text(true, 5.0, 5.5, "he"))
        .await;
    let view = relay.transcripts.get("s1").await;
    assert_eq!(view.partial.as_ref().unwrap().result.corrected, "he");

    relay.orchestrator.process_update("s1", commit(5.0, "hello")).await;
    let view = relay.transcripts.get("s1").await;
    assert!(view.partial.is_none());
    assert_eq!(view.committed.len(), 1);
    assert_eq!(view.committed[0].result.corrected, "hello");
}

#[tokio::test]
async fn stale_partial_is_rejected_and_not_broadcast() {
    let relay = build(None);
    relay.orchestrator.process_update("s1", commit(10.0, "done")).await;

    let mut rx = subscribe(&relay, "s1", "a");
    relay
        .orchestrator
        .process_update("s1", Segment::with_text(true, 9.9, 10.2, "late"))
        .await;

    assert!(relay.transcripts.get("s1").await.partial.is_none());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn rooms_are_isolated() {
    let relay = build(None);
    let mut rx_a = subscribe(&relay, "s1", "a");
    let mut rx_b = subscribe(&relay, "s2", "b");

    relay.orchestrator.process_update("s1", commit(1.0, "only s1")).await;

    let got = update(rx_a.recv().await.unwrap());
    assert_eq!(got.segment.result.corrected, "only s1");
    assert!(rx_b.try_recv().is_err());
}

/// Processor slow enough that a newer submission overlaps the in-flight one.
struct SlowEcho;

#[async_trait]
impl SegmentProcessor for SlowEcho {
    async fn process(&self, _sid: &str, segment: &Segment, _view: &TranscriptView) -> Segment {
        tokio::time::sleep(Duration::from_millis(200)).await;
        segment.clone()
    }
}

#[tokio::test]
async fn superseded_partial_leaves_no_trace_in_store_or_broadcast() {
    let relay = build(Some(Arc::new(SlowEcho)));
    let mut rx = subscribe(&relay, "s1", "a");

    relay
        .orchestrator
        .submit_transcript(SttTranscript {
            sid: "s1".to_owned(),
            segment: Segment::with_text(true, 1.0, 1.5, "p1"),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    relay
        .orchestrator
        .submit_transcript(SttTranscript {
            sid: "s1".to_owned(),
            segment: Segment::with_text(true, 2.0, 2.5, "p2"),
        })
        .await;

    tokio::time::sleep(Duration::from_millis(600)).await;

    let view = relay.transcripts.get("s1").await;
    assert_eq!(view.partial.unwrap().result.corrected, "p2");

    let got = update(rx.recv().await.unwrap());
    assert_eq!(got.segment.result.corrected, "p2");
    assert!(rx.try_recv().is_err());
}
