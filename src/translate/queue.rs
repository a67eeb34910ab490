//! Per-session translation scheduling: one cancellable partial lane and a
//! serial committed lane.
//!
//! Any newer update supersedes an in-flight partial, so `put` aborts the
//! running partial task unconditionally before dispatching. Committed items
//! go through an unbounded FIFO drained by a single driver task, which
//! preserves enqueue order end to end. The pipeline writes nothing until
//! its result message, so an aborted partial leaves no trace anywhere.

use crate::segment::{Segment, TranscriptView};
use crate::translate::SegmentProcessor;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// One unit of translation work.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub sid: String,
    pub segment: Segment,
    /// Transcript snapshot taken when the item was produced.
    pub view: TranscriptView,
}

/// A pipeline result headed for the update-processing routine.
#[derive(Debug, Clone)]
pub struct TranslatedSegment {
    pub sid: String,
    pub segment: Segment,
}

/// Per-session coordinator for the partial and committed translation lanes.
pub struct TranslationQueueManager {
    processor: Arc<dyn SegmentProcessor>,
    done_tx: mpsc::UnboundedSender<TranslatedSegment>,
    commit_tx: mpsc::UnboundedSender<QueueItem>,
    partial_task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl TranslationQueueManager {
    /// Create the manager and start its driver task. Results are delivered
    /// on `done_tx` in committed-lane order (partials interleave freely).
    pub fn new(
        processor: Arc<dyn SegmentProcessor>,
        done_tx: mpsc::UnboundedSender<TranslatedSegment>,
    ) -> Self {
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(drive_commits(
            Arc::clone(&processor),
            commit_rx,
            done_tx.clone(),
            cancel.clone(),
        ));

        Self {
            processor,
            done_tx,
            commit_tx,
            partial_task: Mutex::new(None),
            cancel,
        }
    }

    /// Submit a new unit of work.
    ///
    /// Whatever the new item is, any in-flight partial is now describing
    /// superseded speech and is cancelled first.
    pub fn put(&self, item: QueueItem) {
        {
            let mut slot = self.partial_task.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(task) = slot.take() {
                if !task.is_finished() {
                    debug!("cancelling in-flight partial for {}", item.sid);
                    task.abort();
                }
            }
            if item.segment.partial {
                let processor = Arc::clone(&self.processor);
                let done_tx = self.done_tx.clone();
                *slot = Some(tokio::spawn(async move {
                    let segment = processor.process(&item.sid, &item.segment, &item.view).await;
                    let _ = done_tx.send(TranslatedSegment {
                        sid: item.sid,
                        segment,
                    });
                }));
                return;
            }
        }

        if self.commit_tx.send(item).is_err() {
            error!("committed lane is closed; dropping segment");
        }
    }

    /// Stop the driver and abort any in-flight partial.
    pub fn stop(&self) {
        self.cancel.cancel();
        let mut slot = self.partial_task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

async fn drive_commits(
    processor: Arc<dyn SegmentProcessor>,
    mut commit_rx: mpsc::UnboundedReceiver<QueueItem>,
    done_tx: mpsc::UnboundedSender<TranslatedSegment>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            item = commit_rx.recv() => {
                let Some(item) = item else { break };
                let segment = processor.process(&item.sid, &item.segment, &item.view).await;
                if done_tx
                    .send(TranslatedSegment {
                        sid: item.sid,
                        segment,
                    })
                    .is_err()
                {
                    break;
                }
            }
        }
    }
    debug!("translation driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Processor that sleeps before echoing, tagging output with a marker.
    struct SlowEcho {
        delay: Duration,
    }

    #[async_trait]
    impl SegmentProcessor for SlowEcho {
        async fn process(&self, _sid: &str, segment: &Segment, _view: &TranscriptView) -> Segment {
            tokio::time::sleep(self.delay).await;
            let mut out = segment.clone();
            out.result.corrected = format!("done:{}", out.result.corrected);
            out
        }
    }

    fn item(sid: &str, partial: bool, start: f64, text: &str) -> QueueItem {
        QueueItem {
            sid: sid.to_owned(),
            segment: Segment::with_text(partial, start, start + 1.0, text),
            view: TranscriptView::default(),
        }
    }

    #[tokio::test]
    async fn committed_items_complete_in_enqueue_order() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let manager = TranslationQueueManager::new(
            Arc::new(SlowEcho {
                delay: Duration::from_millis(5),
            }),
            done_tx,
        );

        for (start, text) in [(1.0, "a"), (2.0, "b"), (3.0, "c")] {
            manager.put(item("s1", false, start, text));
        }

        let mut texts = Vec::new();
        for _ in 0..3 {
            texts.push(done_rx.recv().await.unwrap().segment.result.corrected);
        }
        assert_eq!(texts, vec!["done:a", "done:b", "done:c"]);
        manager.stop();
    }

    #[tokio::test]
    async fn newer_partial_cancels_in_flight_partial() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let manager = TranslationQueueManager::new(
            Arc::new(SlowEcho {
                delay: Duration::from_millis(200),
            }),
            done_tx,
        );

        manager.put(item("s1", true, 1.0, "p1"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.put(item("s1", true, 2.0, "p2"));

        let first = done_rx.recv().await.unwrap();
        assert_eq!(first.segment.result.corrected, "done:p2");

        // Nothing else completes: p1 was aborted mid-sleep.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(done_rx.try_recv().is_err());
        manager.stop();
    }

    #[tokio::test]
    async fn committed_put_also_cancels_in_flight_partial() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let manager = TranslationQueueManager::new(
            Arc::new(SlowEcho {
                delay: Duration::from_millis(200),
            }),
            done_tx,
        );

        manager.put(item("s1", true, 1.0, "p1"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.put(item("s1", false, 1.0, "final"));

        let first = done_rx.recv().await.unwrap();
        assert_eq!(first.segment.result.corrected, "done:final");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(done_rx.try_recv().is_err());
        manager.stop();
    }

    #[tokio::test]
    async fn stop_aborts_partial_and_driver() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let manager = TranslationQueueManager::new(
            Arc::new(SlowEcho {
                delay: Duration::from_millis(200),
            }),
            done_tx,
        );
        manager.put(item("s1", true, 1.0, "p1"));
        manager.put(item("s1", false, 2.0, "c1"));
        manager.stop();

        tokio::time::sleep(Duration::from_millis(300)).await;
        // At most the already-dequeued commit may have completed; the
        // aborted partial never reports.
        while let Ok(done) = done_rx.try_recv() {
            assert_ne!(done.segment.result.corrected, "done:p1");
        }
    }
}
