//! Wire messages for the upstream realtime STT socket.

use serde::{Deserialize, Serialize};

/// Frames sent to the upstream socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ScribeRequest {
    InputAudioChunk {
        audio_base_64: String,
        sample_rate: u32,
        commit: bool,
    },
}

impl ScribeRequest {
    /// An uncommitted 16 kHz PCM chunk (the upstream VAD decides commits).
    pub fn audio_chunk(audio_base_64: String) -> Self {
        Self::InputAudioChunk {
            audio_base_64,
            sample_rate: 16_000,
            commit: false,
        }
    }
}

/// Frames received from the upstream socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ScribeEvent {
    SessionStarted,
    PartialTranscript {
        #[serde(default)]
        text: String,
    },
    CommittedTranscript {
        #[serde(default)]
        text: String,
    },
    Error {
        #[serde(default)]
        error: String,
    },
    AuthError {
        #[serde(default)]
        error: String,
    },
    QuotaExceededError {
        #[serde(default)]
        error: String,
    },
    /// Forward-compatible: unrecognized message types are ignored.
    #[serde(other)]
    Unknown,
}

/// Response of the single-use-token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}
