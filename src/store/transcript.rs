//! Per-session transcript log: committed ordered set + volatile partial head.
//!
//! Committed segments live in a cache sorted set scored by `start_time`
//! (O(log n) upsert, O(1) tail read) with a background push to the durable
//! store. The partial head lives under its own key because partials arrive
//! at ~0.5 Hz and each supersedes the previous; keeping them in the
//! committed set would mean deleting the old head on every update.

use crate::error::Result;
use crate::segment::{Segment, TranscriptView};
use crate::store::cache::CacheBackend;
use crate::store::durable::DurableStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// TTL for the per-session transcript keys.
const TRANSCRIPT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Default, Serialize, Deserialize)]
struct TranscriptMeta {
    #[serde(default)]
    stream_start_time: Option<f64>,
}

/// Pre-split legacy blob: one JSON value under `transcription:{sid}`.
#[derive(Debug, Deserialize)]
struct LegacyBlob {
    #[serde(default)]
    transcriptions: Vec<Segment>,
    #[serde(default)]
    stream_start_time: Option<f64>,
    #[serde(default)]
    partial: Option<Segment>,
}

fn list_key(sid: &str) -> String {
    format!("transcription:{sid}:list")
}

fn meta_key(sid: &str) -> String {
    format!("transcription:{sid}:meta")
}

fn partial_key(sid: &str) -> String {
    format!("transcription:{sid}:partial")
}

fn legacy_key(sid: &str) -> String {
    format!("transcription:{sid}")
}

/// Durable per-session transcript log with a hot cache in front.
pub struct TranscriptStore {
    cache: Arc<dyn CacheBackend>,
    durable: Arc<dyn DurableStore>,
}

impl TranscriptStore {
    pub fn new(cache: Arc<dyn CacheBackend>, durable: Arc<dyn DurableStore>) -> Self {
        Self { cache, durable }
    }

    /// Read the session transcript.
    ///
    /// Resolution order: cache sorted set, then the durable store (with
    /// cache backfill). Store failures degrade to an empty view and are
    /// logged, never surfaced.
    pub async fn get(&self, sid: &str) -> TranscriptView {
        if let Err(e) = self.migrate_legacy(sid).await {
            warn!("legacy transcript migration failed for {sid}: {e}");
        }

        let mut committed = match self.cache.zrange_all(&list_key(sid)).await {
            Ok(members) => decode_members(sid, &members),
            Err(e) => {
                warn!("transcript cache read failed for {sid}: {e}");
                Vec::new()
            }
        };

        let mut stream_start_time = self.read_meta(sid).await;

        if committed.is_empty() {
            match self.durable.load_transcript(sid).await {
                Ok(Some(stored)) => {
                    committed = stored.transcriptions;
                    committed.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
                    committed.dedup_by(|a, b| a.start_time == b.start_time);
                    stream_start_time = stored.stream_start_time;
                    self.backfill_cache(sid, &committed, stream_start_time).await;
                }
                Ok(None) => {}
                Err(e) => warn!("transcript store read failed for {sid}: {e}"),
            }
        }

        let partial = match self.cache.get(&partial_key(sid)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("partial read failed for {sid}: {e}");
                None
            }
        };

        TranscriptView {
            committed,
            partial,
            stream_start_time,
        }
    }

    /// Append a committed segment: upsert into the ordered set, refresh the
    /// metadata, clear the partial head, and schedule the durable push.
    pub async fn append_committed(
        &self,
        sid: &str,
        segment: &Segment,
        stream_start_time: Option<f64>,
    ) -> Result<()> {
        let mut segment = segment.clone();
        segment.partial = false;

        let member = serde_json::to_string(&segment)
            .map_err(|e| crate::error::RelayError::Cache(format!("encode segment: {e}")))?;

        // Same start_time means the same unit: drop the old member first so
        // the later write replaces it instead of accumulating a duplicate.
        self.cache
            .zrem_by_score(&list_key(sid), segment.start_time)
            .await?;
        self.cache
            .zadd_ex(&list_key(sid), segment.start_time, &member, TRANSCRIPT_TTL)
            .await?;
        self.write_meta(sid, stream_start_time).await?;
        self.cache.del(&partial_key(sid)).await?;

        // Durable persistence happens off the hot path; a failure is logged
        // and the cache write stands.
        let durable = Arc::clone(&self.durable);
        let sid = sid.to_owned();
        tokio::spawn(async move {
            if let Err(e) = durable.push_segment(&sid, &segment, stream_start_time).await {
                warn!("background persist failed for {sid}: {e}");
            }
        });

        Ok(())
    }

    /// Set the partial head. Partials older than the last committed segment
    /// are stale output from a superseded pipeline run and are dropped.
    pub async fn put_partial(&self, sid: &str, segment: &Segment) -> Result<()> {
        if let Some(last) = self.last_committed(sid).await {
            if last.start_time > segment.start_time {
                info!(
                    "dropping stale partial for {sid} ({} < {})",
                    segment.start_time, last.start_time
                );
                return Ok(());
            }
        }

        let mut segment = segment.clone();
        segment.partial = true;
        let raw = serde_json::to_string(&segment)
            .map_err(|e| crate::error::RelayError::Cache(format!("encode partial: {e}")))?;
        self.cache
            .set_ex(&partial_key(sid), &raw, TRANSCRIPT_TTL)
            .await
    }

    /// The committed segment with the greatest `start_time`, if any.
    pub async fn last_committed(&self, sid: &str) -> Option<Segment> {
        match self.cache.zlast(&list_key(sid)).await {
            Ok(Some(member)) => serde_json::from_str(&member).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("last_committed read failed for {sid}: {e}");
                None
            }
        }
    }

    async fn read_meta(&self, sid: &str) -> Option<f64> {
        match self.cache.get(&meta_key(sid)).await {
            Ok(Some(raw)) => serde_json::from_str::<TranscriptMeta>(&raw)
                .ok()
                .and_then(|meta| meta.stream_start_time),
            Ok(None) => None,
            Err(e) => {
                warn!("meta read failed for {sid}: {e}");
                None
            }
        }
    }

    async fn write_meta(&self, sid: &str, stream_start_time: Option<f64>) -> Result<()> {
        let meta = TranscriptMeta { stream_start_time };
        let raw = serde_json::to_string(&meta)
            .map_err(|e| crate::error::RelayError::Cache(format!("encode meta: {e}")))?;
        self.cache.set_ex(&meta_key(sid), &raw, TRANSCRIPT_TTL).await
    }

    async fn backfill_cache(
        &self,
        sid: &str,
        committed: &[Segment],
        stream_start_time: Option<f64>,
    ) {
        for segment in committed {
            let Ok(member) = serde_json::to_string(segment) else {
                continue;
            };
            if let Err(e) = self
                .cache
                .zadd_ex(&list_key(sid), segment.start_time, &member, TRANSCRIPT_TTL)
                .await
            {
                warn!("cache backfill failed for {sid}: {e}");
                return;
            }
        }
        if let Err(e) = self.write_meta(sid, stream_start_time).await {
            warn!("meta backfill failed for {sid}: {e}");
        }
    }

    /// One-shot migration of the pre-split single-blob key into the
    /// list + meta (+ partial) representation.
    async fn migrate_legacy(&self, sid: &str) -> Result<()> {
        let Some(raw) = self.cache.get(&legacy_key(sid)).await? else {
            return Ok(());
        };
        let Ok(blob) = serde_json::from_str::<LegacyBlob>(&raw) else {
            // Unparseable blob: drop it rather than re-reading it forever.
            warn!("discarding unparseable legacy transcript blob for {sid}");
            return self.cache.del(&legacy_key(sid)).await;
        };

        info!(
            "migrating legacy transcript blob for {sid} ({} segments)",
            blob.transcriptions.len()
        );
        for segment in &blob.transcriptions {
            let Ok(member) = serde_json::to_string(segment) else {
                continue;
            };
            self.cache
                .zadd_ex(&list_key(sid), segment.start_time, &member, TRANSCRIPT_TTL)
                .await?;
        }
        self.write_meta(sid, blob.stream_start_time).await?;
        if let Some(partial) = &blob.partial {
            let raw = serde_json::to_string(partial)
                .map_err(|e| crate::error::RelayError::Cache(format!("encode partial: {e}")))?;
            self.cache
                .set_ex(&partial_key(sid), &raw, TRANSCRIPT_TTL)
                .await?;
        }
        self.cache.del(&legacy_key(sid)).await
    }
}

fn decode_members(sid: &str, members: &[String]) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(members.len());
    for member in members {
        match serde_json::from_str::<Segment>(member) {
            Ok(segment) => segments.push(segment),
            Err(e) => warn!("skipping undecodable cached segment for {sid}: {e}"),
        }
    }
    segments
}
