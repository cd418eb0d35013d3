//! `OpenAI` client.
//!
//! Also works against any Chat Completions compatible endpoint (LM Studio,
//! vLLM) via [`OpenAiClient::with_endpoint`].

use super::{LlmHttpConfig, LlmProvider, build_http_client, check_status, transport_error};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "openai";

/// `OpenAI` LLM client.
pub struct OpenAiClient {
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

impl OpenAiClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Default response token cap.
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;

    /// Creates a new `OpenAI` client, reading `OPENAI_API_KEY`.
    #[must_use]
    pub fn new() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok();
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

    /// Checks if the model is a reasoning-family model.
    ///
    /// These use `max_completion_tokens` instead of `max_tokens` and only
    /// support the default temperature.
    fn is_reasoning_model(&self) -> bool {
        self.model.starts_with("gpt-5")
            || self.model.starts_with("o1")
            || self.model.starts_with("o3")
            || self.model.starts_with("o4")
    }

    fn build_request<'a>(&'a self, messages: Vec<ChatMessage<'a>>) -> ChatCompletionRequest<'a> {
        if self.is_reasoning_model() {
            ChatCompletionRequest {
                model: &self.model,
                messages,
                max_tokens: None,
                max_completion_tokens: Some(self.max_tokens),
                temperature: None,
            }
        } else {
            ChatCompletionRequest {
                model: &self.model,
                messages,
                max_tokens: Some(self.max_tokens),
                max_completion_tokens: None,
                temperature: Some(0.2),
            }
        }
    }

    /// Makes a request to the Chat Completions API.
    fn request(&self, messages: Vec<ChatMessage<'_>>) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::collaborator("openai_request", "OPENAI_API_KEY not set"))?;

        tracing::debug!(provider = PROVIDER, model = %self.model, "Making LLM request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&self.build_request(messages))
            .send()
            .map_err(|e| transport_error(PROVIDER, &self.model, &e))?;
        let response = check_status(PROVIDER, &self.model, response)?;

        let response: ChatCompletionResponse = response
            .json()
            .map_err(|e| Error::collaborator("openai_response", e))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::collaborator("openai_response", "No choices in response"))
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.request(vec![ChatMessage {
            role: "user",
            content: prompt,
        }])
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.request(vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ])
    }
}

/// Request to the Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// An outgoing chat message.
#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}
