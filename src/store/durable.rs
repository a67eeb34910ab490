//! Durable-store backend seam.
//!
//! Committed segments survive process restarts through [`DurableStore`].
//! Deployments back it with MongoDB (`transcription_store` and `rooms`
//! collections); single-process mode and tests use [`MemoryDurable`].

use crate::error::{RelayError, Result};
use crate::segment::{RoomRecord, Segment};
use async_trait::async_trait;
use bson::doc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// A session's persisted transcript.
#[derive(Debug, Clone, Default)]
pub struct StoredTranscript {
    /// Segments in insertion order (ascending `start_time` in practice).
    pub transcriptions: Vec<Segment>,
    /// Stream start time as of the last write.
    pub stream_start_time: Option<f64>,
}

/// Persistence operations for transcripts and room records.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Load the persisted transcript for `sid`, if any.
    async fn load_transcript(&self, sid: &str) -> Result<Option<StoredTranscript>>;

    /// Append one committed segment and refresh the transcript metadata.
    async fn push_segment(
        &self,
        sid: &str,
        segment: &Segment,
        stream_start_time: Option<f64>,
    ) -> Result<()>;

    /// Look up the room record gating producer access to `sid`.
    async fn find_room(&self, sid: &str) -> Result<Option<RoomRecord>>;

    /// Create a room record. The HTTP surface that normally does this is
    /// external to the relay; the operation stays on the trait because the
    /// collections are part of the store contract.
    async fn create_room(&self, record: RoomRecord) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TranscriptDoc {
    sid: String,
    #[serde(default)]
    transcriptions: Vec<Segment>,
    #[serde(default)]
    stream_start_time: Option<f64>,
    #[serde(default)]
    updated_at: Option<bson::DateTime>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RoomDoc {
    sid: String,
    secret_key: String,
    created_at: bson::DateTime,
}

/// MongoDB-backed durable store.
pub struct MongoStore {
    transcripts: mongodb::Collection<TranscriptDoc>,
    rooms: mongodb::Collection<RoomDoc>,
}

impl MongoStore {
    /// Connect to `mongodb://{host}:{port}` and open the collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is rejected.
    pub async fn connect(host: &str, port: u16, db: &str) -> Result<Self> {
        let uri = format!("mongodb://{host}:{port}");
        let client = mongodb::Client::with_uri_str(&uri)
            .await
            .map_err(|e| RelayError::Store(format!("connect {uri}: {e}")))?;
        let database = client.database(db);
        Ok(Self {
            transcripts: database.collection("transcription_store"),
            rooms: database.collection("rooms"),
        })
    }
}

#[async_trait]
impl DurableStore for MongoStore {
    async fn load_transcript(&self, sid: &str) -> Result<Option<StoredTranscript>> {
        let found = self
            .transcripts
            .find_one(doc! { "sid": sid })
            .await
            .map_err(|e| RelayError::Store(format!("find transcript {sid}: {e}")))?;
        Ok(found.map(|doc| StoredTranscript {
            transcriptions: doc.transcriptions,
            stream_start_time: doc.stream_start_time,
        }))
    }

    async fn push_segment(
        &self,
        sid: &str,
        segment: &Segment,
        stream_start_time: Option<f64>,
    ) -> Result<()> {
        let segment = bson::to_bson(segment)
            .map_err(|e| RelayError::Store(format!("encode segment: {e}")))?;
        let stream_start_time = match stream_start_time {
            Some(t) => bson::Bson::Double(t),
            None => bson::Bson::Null,
        };
        self.transcripts
            .update_one(
                doc! { "sid": sid },
                doc! {
                    "$push": { "transcriptions": segment },
                    "$set": {
                        "stream_start_time": stream_start_time,
                        "updated_at": bson::DateTime::now(),
                    },
                },
            )
            .upsert(true)
            .await
            .map_err(|e| RelayError::Store(format!("push segment {sid}: {e}")))?;
        Ok(())
    }

    async fn find_room(&self, sid: &str) -> Result<Option<RoomRecord>> {
        let found = self
            .rooms
            .find_one(doc! { "sid": sid })
            .await
            .map_err(|e| RelayError::Store(format!("find room {sid}: {e}")))?;
        Ok(found.map(|doc| RoomRecord {
            sid: doc.sid,
            secret_key: doc.secret_key,
            created_at: doc.created_at.to_chrono(),
        }))
    }

    async fn create_room(&self, record: RoomRecord) -> Result<()> {
        self.rooms
            .insert_one(RoomDoc {
                sid: record.sid,
                secret_key: record.secret_key,
                created_at: bson::DateTime::from_chrono(record.created_at),
            })
            .await
            .map_err(|e| RelayError::Store(format!("create room: {e}")))?;
        Ok(())
    }
}

/// In-process durable store for single-process mode and tests.
#[derive(Default)]
pub struct MemoryDurable {
    transcripts: Mutex<HashMap<String, StoredTranscript>>,
    rooms: Mutex<HashMap<String, RoomRecord>>,
}

impl MemoryDurable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryDurable {
    async fn load_transcript(&self, sid: &str) -> Result<Option<StoredTranscript>> {
        let transcripts = self.transcripts.lock().unwrap_or_else(|p| p.into_inner());
        Ok(transcripts.get(sid).cloned())
    }

    async fn push_segment(
        &self,
        sid: &str,
        segment: &Segment,
        stream_start_time: Option<f64>,
    ) -> Result<()> {
        let mut transcripts = self.transcripts.lock().unwrap_or_else(|p| p.into_inner());
        let entry = transcripts.entry(sid.to_owned()).or_default();
        entry.transcriptions.push(segment.clone());
        entry.stream_start_time = stream_start_time;
        Ok(())
    }

    async fn find_room(&self, sid: &str) -> Result<Option<RoomRecord>> {
        let rooms = self.rooms.lock().unwrap_or_else(|p| p.into_inner());
        Ok(rooms.get(sid).cloned())
    }

    async fn create_room(&self, record: RoomRecord) -> Result<()> {
        let mut rooms = self.rooms.lock().unwrap_or_else(|p| p.into_inner());
        rooms.insert(record.sid.clone(), record);
        Ok(())
    }
}
