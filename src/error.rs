//! Error types for the relay.

/// Top-level error type for the transcription relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Hot cache (Redis) error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Durable store (MongoDB) error.
    #[error("store error: {0}")]
    Store(String),

    /// Upstream speech-to-text error (token, socket, wire).
    #[error("STT error: {0}")]
    Stt(String),

    /// LLM correction/translation error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RelayError>;
