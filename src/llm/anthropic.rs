//! Anthropic Claude client.

use super::{LlmHttpConfig, LlmProvider, build_http_client, check_status, transport_error};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "anthropic";

/// Anthropic Claude LLM client.
pub struct AnthropicClient {
    /// API key.
    api_key: Option<String>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// Response token cap.
    max_tokens: u32,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl AnthropicClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.anthropic.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "claude-3-5-haiku-latest";

    /// Default response token cap. Synthesis drafts need room.
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;

    /// Creates a new Anthropic client, reading `ANTHROPIC_API_KEY`.
    #[must_use]
    pub fn new() -> Self {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        Self {
            api_key,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            client: build_http_client(LlmHttpConfig::from_env()),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the response token cap.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets HTTP client timeouts for LLM requests.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Returns the API key if it looks like an Anthropic key.
    ///
    /// Keys start with `sk-ant-`, are at least 40 characters and contain only
    /// alphanumerics, hyphens and underscores. Malformed keys are rejected
    /// before any network request.
    fn validated_key(&self) -> Result<&str> {
        const MIN_KEY_LENGTH: usize = 40;
        const PREFIX: &str = "sk-ant-";

        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::collaborator("anthropic_request", "ANTHROPIC_API_KEY not set"))?;

        let well_formed = key.starts_with(PREFIX)
            && key.len() >= MIN_KEY_LENGTH
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !well_formed {
            return Err(Error::collaborator(
                "anthropic_request",
                "Invalid API key format: expected 'sk-ant-' prefix",
            ));
        }
        Ok(key)
    }

    /// Makes a request to the Messages API.
    fn request(&self, system: Option<&str>, user: &str) -> Result<String> {
        let api_key = self.validated_key()?;

        tracing::debug!(provider = PROVIDER, model = %self.model, "Making LLM request");

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| transport_error(PROVIDER, &self.model, &e))?;
        let response = check_status(PROVIDER, &self.model, response)?;

        let response: MessagesResponse = response.json().map_err(|e| {
            tracing::error!(provider = PROVIDER, model = %self.model, error = %e, "Failed to parse LLM response");
            Error::collaborator("anthropic_response", e)
        })?;

        let text: String = response
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect();
        if text.is_empty() {
            return Err(Error::collaborator(
                "anthropic_response",
                "No text content in response",
            ));
        }
        Ok(text)
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for AnthropicClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.request(None, prompt)
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.request(Some(system), user)
    }
}

/// Request to the Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

/// A message in the conversation.
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

/// A content block in the response.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}
