//! Reasoning collaborator and LLM client abstraction.
//!
//! Exploration delegates judging, per-turn analysis and narrative synthesis
//! to a [`Collaborator`]. The default [`LlmCollaborator`] drives any
//! [`LlmProvider`] with JSON-structured prompts.

mod anthropic;
mod bulkhead;
mod collaborator;
mod ollama;
mod openai;
pub mod prompts;

pub use anthropic::AnthropicClient;
pub use bulkhead::{BulkheadConfig, BulkheadLlmProvider};
pub use collaborator::{
    Collaborator, FinalizeRequest, LlmCollaborator, SynthesisRequest, TurnAnalysis,
    TurnAnalysisRequest,
};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Trait for LLM providers.
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] if the completion fails.
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Generates a completion with a system prompt.
    ///
    /// Default implementation concatenates system and user prompts.
    /// Providers should override this to use native system prompt support.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] if the completion fails.
    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        let combined = format!("{system}\n\n---\n\nUser message:\n{user}");
        self.complete(&combined)
    }
}

/// HTTP client configuration for LLM providers.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Loads HTTP configuration from config file settings.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut settings = Self::default();
        if let Some(timeout_ms) = config.timeout_ms {
            settings.timeout_ms = timeout_ms;
        }
        if let Some(connect_timeout_ms) = config.connect_timeout_ms {
            settings.connect_timeout_ms = connect_timeout_ms;
        }
        settings
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(timeout_ms) = env_u64("TRAWL_LLM_TIMEOUT_MS") {
            self.timeout_ms = timeout_ms;
        }
        if let Some(connect_timeout_ms) = env_u64("TRAWL_LLM_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = connect_timeout_ms;
        }
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Builds a blocking HTTP client for LLM requests with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build LLM HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Classifies a transport error for logs and error messages.
pub(crate) fn request_error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_request() {
        "request"
    } else {
        "unknown"
    }
}

/// Maps a transport error to [`Error::Collaborator`], logging it.
pub(crate) fn transport_error(provider: &'static str, model: &str, e: &reqwest::Error) -> Error {
    let error_kind = request_error_kind(e);
    tracing::error!(
        provider = provider,
        model = %model,
        error = %e,
        error_kind = error_kind,
        "LLM request failed"
    );
    Error::collaborator(format!("{provider}_request"), format!("{error_kind} error: {e}"))
}

/// Reads a response, failing with [`Error::Collaborator`] on a non-2xx status.
pub(crate) fn check_status(
    provider: &'static str,
    model: &str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    tracing::error!(
        provider = provider,
        model = %model,
        status = %status,
        body = %body,
        "LLM API returned error status"
    );
    Err(Error::collaborator(
        format!("{provider}_request"),
        format!("API returned status: {status} - {body}"),
    ))
}

/// Extracts JSON from an LLM response, handling markdown code blocks and
/// surrounding prose.
pub(crate) fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // ```json ... ```
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // ``` ... ``` without a language marker
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find(['{', '['])
            .map_or(content_start, |pos| content_start + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Whichever bracket opens first decides between object and array.
    let object = trimmed.find('{').zip(trimmed.rfind('}'));
    let array = trimmed.find('[').zip(trimmed.rfind(']'));
    let span = match (object, array) {
        (Some(o), Some(a)) => Some(if a.0 < o.0 { a } else { o }),
        (o, a) => o.or(a),
    };
    if let Some((start, end)) = span.filter(|(s, e)| s < e) {
        return &trimmed[start..=end];
    }

    trimmed
}

/// Parses a structured reply, failing with [`Error::Collaborator`] for
/// `operation` when it is not valid JSON of the expected shape.
///
/// # Errors
///
/// Returns [`Error::Collaborator`] on unparsable replies.
pub fn parse_json_reply<T: DeserializeOwned>(operation: &str, response: &str) -> Result<T> {
    let json_str = extract_json_from_response(response);
    serde_json::from_str(json_str).map_err(|e| {
        let preview: String = response.chars().take(200).collect();
        Error::collaborator(operation, format!("invalid JSON: {e}. Response: {preview}"))
    })
}

/// Builds the configured LLM provider, wrapped in a bulkhead.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when no provider is configured.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let http = LlmHttpConfig::from_config(config).with_env_overrides();
    let bulkhead = BulkheadConfig::from_config(config).with_env_overrides();

    let provider: Arc<dyn LlmProvider> = match config.provider {
        LlmProviderKind::Anthropic => {
            let mut client = AnthropicClient::new().with_http_config(http);
            if let Some(ref api_key) = config.api_key {
                client = client.with_api_key(api_key);
            }
            if let Some(ref model) = config.model {
                client = client.with_model(model);
            }
            if let Some(ref base_url) = config.base_url {
                client = client.with_endpoint(base_url);
            }
            if let Some(max_tokens) = config.max_tokens {
                client = client.with_max_tokens(max_tokens);
            }
            Arc::new(BulkheadLlmProvider::new(client, bulkhead))
        },
        LlmProviderKind::OpenAi => {
            let mut client = OpenAiClient::new().with_http_config(http);
            if let Some(ref api_key) = config.api_key {
                client = client.with_api_key(api_key);
            }
            if let Some(ref model) = config.model {
                client = client.with_model(model);
            }
            if let Some(ref base_url) = config.base_url {
                client = client.with_endpoint(base_url);
            }
            if let Some(max_tokens) = config.max_tokens {
                client = client.with_max_tokens(max_tokens);
            }
            Arc::new(BulkheadLlmProvider::new(client, bulkhead))
        },
        LlmProviderKind::Ollama => {
            let mut client = OllamaClient::new().with_http_config(http);
            if let Some(ref model) = config.model {
                client = client.with_model(model);
            }
            if let Some(ref base_url) = config.base_url {
                client = client.with_endpoint(base_url);
            }
            Arc::new(BulkheadLlmProvider::new(client, bulkhead))
        },
        LlmProviderKind::None => {
            return Err(Error::InvalidInput(
                "no LLM provider configured; set [llm].provider or TRAWL_LLM_PROVIDER"
                    .to_string(),
            ));
        },
    };

    tracing::debug!(provider = provider.name(), "Created LLM provider");
    Ok(provider)
}
