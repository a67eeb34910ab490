//! Configuration types for the transcription relay.
//!
//! Every knob comes from the environment (the relay runs containerized next
//! to Redis and MongoDB); [`RelayConfig::from_env`] is the single entry
//! point. Defaults match a local single-process deployment with no external
//! services configured.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket gateway settings.
    pub server: ServerConfig,
    /// Hot cache settings.
    pub cache: CacheConfig,
    /// Durable store settings.
    pub store: StoreConfig,
    /// Upstream speech-to-text settings.
    pub stt: SttConfig,
    /// Correction/translation pipeline settings.
    pub translate: TranslateConfig,
    /// Live-stream start-time oracle settings.
    pub oracle: OracleConfig,
}

/// WebSocket gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the gateway binds to.
    pub bind_addr: String,
    /// Admin secret; connections presenting it are verified for every room.
    ///
    /// When unset, admin verification always fails (the server still runs).
    pub secret_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_owned(),
            secret_key: None,
        }
    }
}

/// Hot cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis URL, e.g. `redis://redis:6379`. `None` selects the in-process
    /// memory cache (single-process deployments and tests).
    pub redis_url: Option<String>,
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// MongoDB host. `None` selects the in-process memory store.
    pub host: Option<String>,
    /// MongoDB port.
    pub port: u16,
    /// Database name.
    pub db: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 27017,
            db: "translive-db".to_owned(),
        }
    }
}

/// Upstream speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// ElevenLabs API key. When unset, producer events are accepted but no
    /// upstream session is opened.
    pub api_key: Option<String>,
    /// HTTPS base for the single-use-token endpoint.
    pub api_base: String,
    /// WebSocket base for the realtime endpoint.
    pub ws_base: String,
    /// Minimum seconds between emitted partial transcripts.
    pub partial_interval_secs: f64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.elevenlabs.io".to_owned(),
            ws_base: "wss://api.elevenlabs.io".to_owned(),
            partial_interval_secs: 2.0,
        }
    }
}

/// Correction/translation pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// OpenAI-compatible API key. When unset, segments pass through
    /// untranslated.
    pub api_key: Option<String>,
    /// OpenAI-compatible API base (tests point this at a mock server).
    pub api_base: String,
    /// Model id for every pipeline call.
    pub model: String,
    /// Target language tags. Empty disables the pipeline.
    pub languages: Vec<String>,
    /// Seed keywords for new sessions (from `COMMON_PROMPT`).
    pub seed_keywords: Vec<String>,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com".to_owned(),
            model: "gpt-4.1-mini".to_owned(),
            languages: Vec::new(),
            seed_keywords: Vec::new(),
        }
    }
}

/// Live-stream start-time oracle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// YouTube Data API key. When unset, lookups return `None`.
    pub api_key: Option<String>,
    /// API base (tests point this at a mock server).
    pub api_base: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://www.googleapis.com".to_owned(),
        }
    }
}

impl RelayConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_opt("BIND_ADDR") {
            config.server.bind_addr = addr;
        }
        config.server.secret_key = env_opt("SECRET_KEY");

        config.cache.redis_url = env_opt("REDIS_URL");

        config.store.host = env_opt("MONGODB_HOST");
        if let Some(port) = env_opt("MONGODB_PORT").and_then(|p| p.parse().ok()) {
            config.store.port = port;
        }
        if let Some(db) = env_opt("MONGODB_DB") {
            config.store.db = db;
        }

        config.stt.api_key = env_opt("ELEVENLABS_API_KEY");
        if let Some(base) = env_opt("ELEVENLABS_API_BASE") {
            config.stt.api_base = base.clone();
            config.stt.ws_base = base.replacen("http", "ws", 1);
        }
        if let Some(interval) = env_opt("PARTIAL_INTERVAL").and_then(|v| v.parse().ok()) {
            config.stt.partial_interval_secs = interval;
        }

        config.translate.api_key = env_opt("OPENAI_API_KEY");
        if let Some(base) = env_opt("OPENAI_API_BASE") {
            config.translate.api_base = base;
        }
        if let Some(model) = env_opt("AI_MODEL") {
            config.translate.model = model;
        }
        if let Some(languages) = env_opt("TRANSLATE_LANGUAGES") {
            config.translate.languages = parse_list(&languages);
        }
        if let Some(prompt) = env_opt("COMMON_PROMPT") {
            config.translate.seed_keywords = parse_list(&prompt);
        }

        config.oracle.api_key = env_opt("YOUTUBE_API_KEY");
        if let Some(base) = env_opt("YOUTUBE_API_BASE") {
            config.oracle.api_base = base;
        }

        config
    }
}

fn env_opt(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(_) => None,
    }
}

/// Split a comma-separated setting into trimmed non-empty entries.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_trims_and_drops_empties() {
        assert_eq!(parse_list("en, ja ,,zh-TW"), vec!["en", "ja", "zh-TW"]);
        assert!(parse_list("").is_empty());
        assert!(parse_list(" , ").is_empty());
    }

    #[test]
    fn defaults_run_without_external_services() {
        let config = RelayConfig::default();
        assert!(config.cache.redis_url.is_none());
        assert!(config.store.host.is_none());
        assert_eq!(config.stt.partial_interval_secs, 2.0);
        assert_eq!(config.translate.model, "gpt-4.1-mini");
        assert!(config.translate.languages.is_empty());
    }
}
