//! JSON event envelopes spoken on the gateway socket.
//!
//! Ingress and egress both use `{"event": ..., "data": ...}` envelopes.
//! Ingress parsing goes through [`ClientEvent::parse`] so an omitted or
//! null `data` behaves like `{}` — producer clients are sloppy about
//! sending empty payloads.

use crate::segment::{Segment, SegmentResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events clients send to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection handshake; the admin secret verifies every room at once.
    Connect { secret_key: Option<String> },
    /// Subscribe to a session room, optionally proving the room secret.
    JoinSession {
        session_id: Option<String>,
        secret_key: Option<String>,
    },
    /// Unsubscribe from a session room.
    LeaveSession { session_id: Option<String> },
    /// Legacy producer path: a fully-formed segment.
    Sync(SyncData),
    /// Producer announces intent to stream audio.
    RealtimeConnect,
    /// A base64 PCM chunk from the producer.
    AudioBufferAppend { audio: Option<String> },
}

/// Payload of the legacy `sync` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
    #[serde(default)]
    pub result: SegmentResult,
}

impl SyncData {
    /// The segment this sync carries (`id`/`secret_key` are envelope-only).
    pub fn segment(&self) -> Segment {
        Segment {
            partial: self.partial,
            start_time: self.start_time,
            end_time: self.end_time,
            result: self.result.clone(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientEvent {
    /// Parse one ingress frame. Returns `None` for unknown event names so
    /// the gateway can answer with a validation error instead of dropping
    /// the connection.
    pub fn parse(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        let data = match envelope.data {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        let event = match envelope.event.as_str() {
            "connect" => Self::Connect {
                secret_key: field(&data, "secret_key"),
            },
            "join_session" => Self::JoinSession {
                session_id: field(&data, "session_id"),
                secret_key: field(&data, "secret_key"),
            },
            "leave_session" => Self::LeaveSession {
                session_id: field(&data, "session_id"),
            },
            "sync" => Self::Sync(serde_json::from_value(data)?),
            "realtime_connect" => Self::RealtimeConnect,
            "audio_buffer_append" => Self::AudioBufferAppend {
                audio: field(&data, "audio"),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn field(data: &Value, name: &str) -> Option<String> {
    data.get(name).and_then(Value::as_str).map(str::to_owned)
}

/// The `transcription_update` payload: the updated segment plus the
/// committed tail, so subscribers can render without a full re-fetch.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionUpdate {
    #[serde(flatten)]
    pub segment: Segment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_committed: Option<Segment>,
}

/// Events the gateway sends to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected { status: String, client_id: String },
    JoinedSession { session_id: String },
    LeftSession { session_id: String },
    TranscriptionUpdate(TranscriptionUpdate),
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
