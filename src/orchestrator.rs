//! Per-session lifecycle and the update-processing routine.
//!
//! The orchestrator owns the per-session STT and translation managers,
//! threads STT output into the translation queue, and threads translation
//! output into the transcript store and the room broadcast. It is the
//! single point of truth for stale-partial rejection: a partial whose
//! `start_time` is older than the last committed segment at update time is
//! discarded.

use crate::config::RelayConfig;
use crate::gateway::events::{ServerEvent, TranscriptionUpdate};
use crate::oracle::StartTimeOracle;
use crate::rooms::RoomRegistry;
use crate::segment::Segment;
use crate::store::TranscriptStore;
use crate::stt::{ScribeSessionManager, SttTranscript};
use crate::translate::SegmentProcessor;
use crate::translate::queue::{QueueItem, TranslatedSegment, TranslationQueueManager};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Wires one live session's STT, translation, store and broadcast together.
pub struct SessionOrchestrator {
    config: RelayConfig,
    http: reqwest::Client,
    transcripts: Arc<TranscriptStore>,
    processor: Arc<dyn SegmentProcessor>,
    oracle: Arc<StartTimeOracle>,
    rooms: Arc<RoomRegistry<ServerEvent>>,
    active_stt: DashMap<String, Arc<ScribeSessionManager>>,
    active_translation: DashMap<String, Arc<TranslationQueueManager>>,
    stt_tx: mpsc::UnboundedSender<SttTranscript>,
    done_tx: mpsc::UnboundedSender<TranslatedSegment>,
}

impl SessionOrchestrator {
    /// Build the orchestrator and start its two consumer loops (STT output
    /// and translation output).
    pub fn new(
        config: RelayConfig,
        http: reqwest::Client,
        transcripts: Arc<TranscriptStore>,
        processor: Arc<dyn SegmentProcessor>,
        oracle: Arc<StartTimeOracle>,
        rooms: Arc<RoomRegistry<ServerEvent>>,
    ) -> Arc<Self> {
        let (stt_tx, mut stt_rx) = mpsc::unbounded_channel::<SttTranscript>();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TranslatedSegment>();

        let orchestrator = Arc::new(Self {
            config,
            http,
            transcripts,
            processor,
            oracle,
            rooms,
            active_stt: DashMap::new(),
            active_translation: DashMap::new(),
            stt_tx,
            done_tx,
        });

        // STT output → translation queue, with a fresh transcript snapshot.
        // The shared receiver only routes; a worker task per session does
        // the store round-trips, so sessions stay independent of each
        // other's cache and store latency.
        let this = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let mut workers: HashMap<String, mpsc::UnboundedSender<SttTranscript>> =
                HashMap::new();
            while let Some(transcript) = stt_rx.recv().await {
                let worker = workers
                    .entry(transcript.sid.clone())
                    .or_insert_with(|| {
                        let (tx, mut rx) = mpsc::unbounded_channel::<SttTranscript>();
                        let this = Arc::clone(&this);
                        tokio::spawn(async move {
                            while let Some(transcript) = rx.recv().await {
                                this.submit_transcript(transcript).await;
                            }
                        });
                        tx
                    });
                let _ = worker.send(transcript);
            }
            debug!("STT dispatcher stopped");
        });

        // Translation output → store + room broadcast, with the same
        // per-session fan-out; per-session workers keep committed-lane
        // results in order while an oracle or store stall in one session
        // cannot delay another session's broadcast.
        let this = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let mut workers: HashMap<String, mpsc::UnboundedSender<TranslatedSegment>> =
                HashMap::new();
            while let Some(done) = done_rx.recv().await {
                let worker = workers.entry(done.sid.clone()).or_insert_with(|| {
                    let (tx, mut rx) = mpsc::unbounded_channel::<TranslatedSegment>();
                    let this = Arc::clone(&this);
                    tokio::spawn(async move {
                        while let Some(done) = rx.recv().await {
                            this.process_update(&done.sid, done.segment).await;
                        }
                    });
                    tx
                });
                let _ = worker.send(done);
            }
            debug!("translation dispatcher stopped");
        });

        orchestrator
    }

    /// First producer event for `sid`: make sure both managers exist.
    ///
    /// A dead STT manager (upstream error or closed socket) is replaced so
    /// the producer can resume streaming.
    pub fn ensure_producer(&self, sid: &str) {
        self.ensure_translation(sid);

        let stale = self
            .active_stt
            .get(sid)
            .is_some_and(|manager| !manager.is_alive());
        if stale {
            self.active_stt.remove(sid);
        }
        self.active_stt.entry(sid.to_owned()).or_insert_with(|| {
            info!("starting STT session for {sid}");
            ScribeSessionManager::start(
                sid.to_owned(),
                self.config.stt.clone(),
                self.http.clone(),
                self.stt_tx.clone(),
            )
        });
    }

    /// Producer audio for `sid`; lazily instantiates the managers.
    pub fn push_audio(&self, sid: &str, base64_audio: String) {
        self.ensure_producer(sid);
        if let Some(manager) = self.active_stt.get(sid) {
            manager.push_audio(base64_audio);
        }
    }

    /// Stop a session's STT manager (producer went away).
    pub fn stop_stt(&self, sid: &str) {
        if let Some((_, manager)) = self.active_stt.remove(sid) {
            info!("stopping STT session for {sid}");
            manager.stop();
        }
    }

    /// Apply one translated segment to the store and broadcast it.
    ///
    /// This is the single write path: the realtime pipeline and the legacy
    /// `sync` producer both land here.
    pub async fn process_update(&self, sid: &str, segment: Segment) {
        let view = self.transcripts.get(sid).await;

        // Overwrite the stream start time only when the oracle knows better.
        let stream_start_time = match self.oracle.stream_start_time(sid).await {
            Some(t) => Some(t),
            None => view.stream_start_time,
        };

        let last_committed = if segment.partial {
            if let Some(last) = view.last_committed() {
                if last.start_time > segment.start_time {
                    debug!(
                        "rejecting stale partial for {sid} ({} < {})",
                        segment.start_time, last.start_time
                    );
                    return;
                }
            }
            if let Err(e) = self.transcripts.put_partial(sid, &segment).await {
                warn!("partial write failed for {sid}: {e}");
            }
            view.last_committed().cloned()
        } else {
            if let Err(e) = self
                .transcripts
                .append_committed(sid, &segment, stream_start_time)
                .await
            {
                warn!("commit write failed for {sid}: {e}");
            }
            self.transcripts.last_committed(sid).await
        };

        self.rooms.publish(
            sid,
            &ServerEvent::TranscriptionUpdate(TranscriptionUpdate {
                segment,
                last_committed,
            }),
        );
    }

    /// Stop everything: STT managers first, then translation managers.
    /// The shared HTTP client is released with the process.
    pub fn shutdown(&self) {
        info!("orchestrator shutting down");
        for entry in self.active_stt.iter() {
            entry.value().stop();
        }
        self.active_stt.clear();
        for entry in self.active_translation.iter() {
            entry.value().stop();
        }
        self.active_translation.clear();
    }

    /// Hand one normalized STT transcript to the translation queue with a
    /// fresh transcript snapshot. This is the STT-facing entry point; the
    /// internal consumer loop routes socket output here.
    pub async fn submit_transcript(&self, transcript: SttTranscript) {
        let manager = self.ensure_translation(&transcript.sid);
        let view = self.transcripts.get(&transcript.sid).await;
        manager.put(QueueItem {
            sid: transcript.sid,
            segment: transcript.segment,
            view,
        });
    }

    fn ensure_translation(&self, sid: &str) -> Arc<TranslationQueueManager> {
        self.active_translation
            .entry(sid.to_owned())
            .or_insert_with(|| {
                Arc::new(TranslationQueueManager::new(
                    Arc::clone(&self.processor),
                    self.done_tx.clone(),
                ))
            })
            .clone()
    }
}
