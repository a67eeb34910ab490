//! Minimal OpenAI-compatible chat-completions client.
//!
//! Every pipeline call is a single non-streaming completion at
//! `temperature: 0`; keyword extraction additionally requests a JSON
//! object response.

use crate::config::TranslateConfig;
use crate::error::{RelayError, Result};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// A single prompt message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// `developer` or `user`.
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn developer(content: impl Into<String>) -> Self {
        Self {
            role: "developer",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Chat-completions client bound to one model and API base.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    /// Build a client from configuration; `None` when no API key is set
    /// (the pipeline then passes segments through untouched).
    pub fn from_config(http: reqwest::Client, config: &TranslateConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            api_key,
            model: config.model.clone(),
        })
    }

    /// Run one completion and return the assistant message content.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, or a
    /// response without message content.
    pub async fn complete(&self, messages: &[ChatMessage], json_object: bool) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": messages,
        });
        if json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let url = format!("{}/v1/chat/completions", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Llm(format!("request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Llm(format!("status {status}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RelayError::Llm(format!("decode: {e}")))?;
        debug!("chat completion returned {} bytes", payload.to_string().len());

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| RelayError::Llm("response missing message content".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_role_and_content() {
        let msg = ChatMessage::developer("fix this");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"developer\""));
        assert!(json.contains("\"content\":\"fix this\""));
    }

    #[test]
    fn missing_api_key_yields_no_client() {
        let config = TranslateConfig::default();
        assert!(ChatClient::from_config(reqwest::Client::new(), &config).is_none());
    }
}
