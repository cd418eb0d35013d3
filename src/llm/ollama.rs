//! Ollama (local) client.

use super::{LlmHttpConfig, LlmProvider, build_http_client, check_status, transport_error};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "ollama";

/// Ollama local LLM client.
pub struct OllamaClient {
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "llama3.2";

    /// Creates a new Ollama client, honouring `OLLAMA_HOST` and `OLLAMA_MODEL`.
    #[must_use]
    pub fn new() -> Self {
        let endpoint =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string());
        let model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());

        Self {
            endpoint,
            model,
            client: build_http_client(LlmHttpConfig::from_env()),
        }
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

    /// Sets HTTP client timeouts for LLM requests.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Checks if Ollama is reachable.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .is_ok_and(|r| r.status().is_success())
    }

    /// Makes a chat request. JSON output mode is requested because every
    /// collaborator prompt expects a JSON reply.
    fn chat(&self, messages: Vec<ChatMessage<'_>>) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            format: "json",
        };

        tracing::debug!(provider = PROVIDER, model = %self.model, "Making LLM request");

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&request)
            .send()
            .map_err(|e| transport_error(PROVIDER, &self.model, &e))?;
        let response = check_status(PROVIDER, &self.model, response)?;

        let response: ChatResponse = response
            .json()
            .map_err(|e| Error::collaborator("ollama_response", e))?;
        Ok(response.message.content)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for OllamaClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.chat(vec![ChatMessage {
            role: "user",
            content: prompt,
        }])
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.chat(vec![
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

/// Request to the Chat API.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'a str,
}

/// An outgoing chat message.
#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response from the Chat API.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}
