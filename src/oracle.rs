//! External lookups: the shared HTTP client and the live-stream
//! start-time oracle.

use crate::config::OracleConfig;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::warn;

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Process-wide HTTP client for LLM, token and oracle calls.
///
/// Lazily initialized; the pool is torn down when the process exits the
/// runtime. Timeouts bound every call site so a partial-translation task
/// stays cancellable.
pub fn shared_http_client() -> reqwest::Client {
    HTTP_CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default()
        })
        .clone()
}

/// Looks up when a live stream actually started.
///
/// Results are cached for the process lifetime, including misses: a video
/// without stream metadata will not produce repeated API calls.
pub struct StartTimeOracle {
    http: reqwest::Client,
    config: OracleConfig,
    cache: Mutex<HashMap<String, Option<f64>>>,
}

impl StartTimeOracle {
    pub fn new(http: reqwest::Client, config: OracleConfig) -> Self {
        Self {
            http,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Stream start time for `video_id` as UTC seconds, if known.
    pub async fn stream_start_time(&self, video_id: &str) -> Option<f64> {
        {
            let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(cached) = cache.get(video_id) {
                return *cached;
            }
        }

        let Some(api_key) = &self.config.api_key else {
            return None;
        };

        let url = format!(
            "{}/youtube/v3/videos",
            self.config.api_base.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .query(&[
                ("part", "liveStreamingDetails"),
                ("id", video_id),
                ("key", api_key),
            ])
            .send()
            .await;

        let payload: serde_json::Value = match response {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(payload) => payload,
                Err(e) => {
                    // Transient decode failure: do not negative-cache.
                    warn!("oracle decode failed for {video_id}: {e}");
                    return None;
                }
            },
            Ok(response) => {
                warn!("oracle status {} for {video_id}", response.status());
                return None;
            }
            Err(e) => {
                warn!("oracle request failed for {video_id}: {e}");
                return None;
            }
        };

        let start_time = extract_start_time(&payload);
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.insert(video_id.to_owned(), start_time);
        start_time
    }
}

/// Pull `actualStartTime` (or `scheduledStartTime` as fallback) out of a
/// YouTube `videos.list` response.
fn extract_start_time(payload: &serde_json::Value) -> Option<f64> {
    let details = payload["items"].get(0)?.get("liveStreamingDetails")?;
    let raw = details
        .get("actualStartTime")
        .or_else(|| details.get("scheduledStartTime"))?
        .as_str()?;
    let parsed = chrono::DateTime::parse_from_rfc3339(raw).ok()?;
    Some(parsed.timestamp() as f64 + f64::from(parsed.timestamp_subsec_millis()) / 1000.0)
}
