//! Per-session keyword list carried into LLM prompts.

use crate::error::Result;
use crate::store::cache::CacheBackend;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Keywords outlive the transcript cache so a session picked up the next
/// day still biases correction the same way.
const KEYWORD_TTL: Duration = Duration::from_secs(86_400);

fn keywords_key(sid: &str) -> String {
    format!("keywords:{sid}")
}

/// Session keyword list: cache-backed, seeded from static configuration.
#[derive(Clone)]
pub struct KeywordStore {
    cache: Arc<dyn CacheBackend>,
    seed: Vec<String>,
}

impl KeywordStore {
    pub fn new(cache: Arc<dyn CacheBackend>, seed: Vec<String>) -> Self {
        Self { cache, seed }
    }

    /// Current keywords for `sid`; the static seed on miss or expiry.
    pub async fn get(&self, sid: &str) -> Vec<String> {
        match self.cache.get(&keywords_key(sid)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("undecodable keyword list for {sid}: {e}");
                self.seed.clone()
            }),
            Ok(None) => self.seed.clone(),
            Err(e) => {
                warn!("keyword read failed for {sid}: {e}");
                self.seed.clone()
            }
        }
    }

    /// Replace the keyword list for `sid`.
    pub async fn set(&self, sid: &str, keywords: &[String]) -> Result<()> {
        let raw = serde_json::to_string(keywords)
            .map_err(|e| crate::error::RelayError::Cache(format!("encode keywords: {e}")))?;
        self.cache.set_ex(&keywords_key(sid), &raw, KEYWORD_TTL).await
    }

    /// Append any entries of `extracted` not already present, preserving
    /// order. Concurrent appends may race and lose a keyword; it will be
    /// re-extracted on the next committed segment.
    pub async fn append_new(&self, sid: &str, extracted: &[String]) {
        let mut current = self.get(sid).await;
        let mut changed = false;
        for keyword in extracted {
            if !keyword.is_empty() && !current.iter().any(|k| k == keyword) {
                current.push(keyword.clone());
                changed = true;
            }
        }
        if changed {
            if let Err(e) = self.set(sid, &current).await {
                warn!("keyword write failed for {sid}: {e}");
            }
        }
    }
}
