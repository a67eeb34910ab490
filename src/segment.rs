//! Transcript data model shared across the relay.
//!
//! A [`Segment`] is the unit that flows producer → STT → translation →
//! store → room. Within a session a committed segment is identified by its
//! `start_time`; two committed segments with equal `start_time` are the same
//! unit and the later write replaces the earlier one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single transcript unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Speculative (replaceable) vs committed (final, ordered, durable).
    #[serde(default)]
    pub partial: bool,
    /// UTC seconds when the spoken audio started.
    pub start_time: f64,
    /// UTC seconds when the spoken audio ended.
    pub end_time: f64,
    /// Correction/translation output for this unit.
    #[serde(default)]
    pub result: SegmentResult,
}

/// Correction and translation output attached to a segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
    /// Corrected transcript text (raw STT text until the pipeline runs).
    #[serde(default)]
    pub corrected: String,
    /// Language tag → translated text.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub translated: BTreeMap<String, String>,
    /// Domain keywords the LLM extracted from this unit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub special_keywords: Vec<String>,
}

impl Segment {
    /// A bare segment carrying only transcribed text.
    pub fn with_text(partial: bool, start_time: f64, end_time: f64, text: &str) -> Self {
        Self {
            partial,
            start_time,
            end_time,
            result: SegmentResult {
                corrected: text.to_owned(),
                ..SegmentResult::default()
            },
        }
    }
}

/// A read snapshot of one session's transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptView {
    /// Committed segments, ascending by `start_time`, unique by `start_time`.
    #[serde(default, rename = "transcriptions")]
    pub committed: Vec<Segment>,
    /// The single volatile partial head, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<Segment>,
    /// When the live stream actually started, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_start_time: Option<f64>,
}

impl TranscriptView {
    /// The committed segment with the greatest `start_time`.
    pub fn last_committed(&self) -> Option<&Segment> {
        self.committed.last()
    }
}

/// A room record gating the legacy producer path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Session id.
    pub sid: String,
    /// Per-room producer secret.
    pub secret_key: String,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Current wall clock as UTC seconds, matching segment timestamps.
pub fn utc_now_secs() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_round_trips_wire_shape() {
        let json = r#"{
            "partial": false,
            "start_time": 12.5,
            "end_time": 14.0,
            "result": {
                "corrected": "hello",
                "translated": {"ja": "こんにちは"},
                "special_keywords": ["g0v"]
            }
        }"#;
        let segment: Segment = serde_json::from_str(json).unwrap();
        assert!(!segment.partial);
        assert_eq!(segment.result.translated["ja"], "こんにちは");

        let out = serde_json::to_value(&segment).unwrap();
        assert_eq!(out["start_time"], 12.5);
        assert_eq!(out["result"]["special_keywords"][0], "g0v");
    }

    #[test]
    fn bare_segment_omits_empty_result_maps() {
        let segment = Segment::with_text(true, 1.0, 2.0, "hi");
        let out = serde_json::to_value(&segment).unwrap();
        assert_eq!(out["result"]["corrected"], "hi");
        assert!(out["result"].get("translated").is_none());
        assert!(out["result"].get("special_keywords").is_none());
    }

    #[test]
    fn view_reads_legacy_transcriptions_field() {
        let json = r#"{"transcriptions":[{"start_time":1.0,"end_time":2.0}],"stream_start_time":9.0}"#;
        let view: TranscriptView = serde_json::from_str(json).unwrap();
        assert_eq!(view.committed.len(), 1);
        assert_eq!(view.stream_start_time, Some(9.0));
        assert_eq!(view.last_committed().map(|s| s.start_time), Some(1.0));
    }
}
