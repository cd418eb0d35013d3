//! Configuration management.
//!
//! Configuration is layered: defaults, then a TOML file, then `TRAWL_*`
//! environment variables. The file is looked up at `--config`, then
//! `TRAWL_CONFIG_PATH`, then the platform config directory
//! (`~/.config/trawl/config.toml` on Linux).
//!
//! ```toml
//! data_dir = "~/.local/share/trawl"
//! history_db = "/srv/trawl/history.db"
//!
//! [exploration]
//! max_iterations = 5
//! max_workers = 5
//! admission_threshold = 7.0
//!
//! [storage]
//! backend = "sqlite"
//!
//! [llm]
//! provider = "anthropic"
//! api_key = "${ANTHROPIC_API_KEY}"
//!
//! [logging]
//! format = "json"
//! ```

mod exploration;

pub use exploration::ExplorationConfig;

use crate::storage::SessionBackendType;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration for trawl.
#[derive(Debug, Clone)]
pub struct TrawlConfig {
    /// Directory for session and history databases.
    pub data_dir: PathBuf,
    /// History database override.
    pub history_db: Option<PathBuf>,
    /// Exploration tuning.
    pub exploration: ExplorationConfig,
    /// Session storage selection.
    pub storage: StorageConfig,
    /// LLM provider configuration.
    pub llm: LlmConfig,
    /// Logging settings (resolved by [`crate::observability`]).
    pub logging: LoggingSettings,
}

/// Session storage configuration.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Backend for event logs and blobs.
    pub backend: SessionBackendType,
    /// Database path for the `sqlite` backend.
    pub path: Option<PathBuf>,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// Provider selection.
    pub provider: LlmProviderKind,
    /// Model name.
    pub model: Option<String>,
    /// API key (may be an environment reference like `${OPENAI_API_KEY}`).
    pub api_key: Option<String>,
    /// Base URL for the provider (for self-hosted or compatible endpoints).
    pub base_url: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Response token cap.
    pub max_tokens: Option<u32>,
    /// Maximum concurrent calls across all threads.
    pub max_concurrent: Option<usize>,
}

/// Available LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProviderKind {
    /// No provider configured.
    #[default]
    None,
    /// Anthropic Claude.
    Anthropic,
    /// `OpenAI` or a compatible endpoint.
    OpenAi,
    /// Ollama (local).
    Ollama,
}

impl LlmProviderKind {
    /// Parses a provider name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Some(Self::None),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" | "lmstudio" | "lm_studio" | "lm-studio" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }
}

/// Logging section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive (e.g. `info`, `trawl=debug`).
    pub level: Option<String>,
    /// Log file path; logs go to stderr when unset.
    pub file: Option<String>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// History database path.
    pub history_db: Option<String>,
    /// Exploration section.
    pub exploration: Option<ConfigFileExploration>,
    /// Storage section.
    pub storage: Option<ConfigFileStorage>,
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

/// Exploration section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileExploration {
    /// Iteration cap.
    pub max_iterations: Option<u32>,
    /// Worker cap per iteration.
    pub max_workers: Option<usize>,
    /// Delay between worker starts.
    pub worker_stagger_ms: Option<u64>,
    /// Minimum judge score for admission.
    pub admission_threshold: Option<f32>,
    /// Items per judge.
    pub judge_batch_size: Option<usize>,
    /// Judge cap per iteration.
    pub max_judges: Option<usize>,
    /// Results requested per search.
    pub search_limit: Option<usize>,
    /// High-priority leads forwarded per turn.
    pub max_leads_per_turn: Option<usize>,
    /// Peer findings shown to each analysis call.
    pub finding_window: Option<usize>,
    /// Synthesis tick period.
    pub synthesis_interval_ms: Option<u64>,
}

/// Storage section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStorage {
    /// Backend name.
    pub backend: Option<String>,
    /// Database path.
    pub path: Option<String>,
}

/// LLM section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLlm {
    /// Provider name.
    pub provider: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Base URL.
    pub base_url: Option<String>,
    /// Request timeout.
    pub timeout_ms: Option<u64>,
    /// Connect timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Response token cap.
    pub max_tokens: Option<u32>,
    /// Concurrency cap.
    pub max_concurrent: Option<usize>,
}

impl Default for TrawlConfig {
    fn default() -> Self {
        Self {
            data_dir: crate::storage::default_data_dir(),
            history_db: None,
            exploration: ExplorationConfig::default(),
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Expands a `${VAR}` reference; other values pass through unchanged.
fn expand_env_reference(value: &str) -> Option<String> {
    match value
        .trim()
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => std::env::var(var).ok(),
        None => Some(value.to_string()),
    }
}

fn parse_backend(name: &str) -> Result<SessionBackendType> {
    SessionBackendType::parse(name)
        .ok_or_else(|| Error::InvalidInput(format!("unknown storage backend: {name}")))
}

fn parse_provider(name: &str) -> Result<LlmProviderKind> {
    LlmProviderKind::parse(name)
        .ok_or_else(|| Error::InvalidInput(format!("unknown LLM provider: {name}")))
}

impl TrawlConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path, without env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or names an
    /// unknown backend or provider.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `TRAWL_CONFIG_PATH`, then the platform config dir, then
    /// `~/.config/trawl/`. Returns defaults if no file is found or a found
    /// file is unreadable (with a warning).
    #[must_use]
    pub fn load_default() -> Self {
        let candidates = std::env::var_os("TRAWL_CONFIG_PATH")
            .map(PathBuf::from)
            .into_iter()
            .chain(directories::BaseDirs::new().into_iter().flat_map(|dirs| {
                [
                    dirs.config_dir().join("trawl").join("config.toml"),
                    dirs.home_dir().join(".config").join("trawl").join("config.toml"),
                ]
            }));

        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                },
            }
        }
        Self::default()
    }

    /// Loads configuration from `path` (strict) or the default location
    /// (lenient), then applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file cannot be loaded, an override is
    /// malformed, or the result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        let config = config.with_overrides(|key| std::env::var(key).ok())?;
        config.exploration.validate()?;
        Ok(config)
    }

    /// Converts a `ConfigFile` to `TrawlConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        config.history_db = file.history_db.map(PathBuf::from);

        if let Some(section) = file.exploration {
            let e = &mut config.exploration;
            e.max_iterations = section.max_iterations.unwrap_or(e.max_iterations);
            e.max_workers = section.max_workers.unwrap_or(e.max_workers);
            e.worker_stagger_ms = section.worker_stagger_ms.unwrap_or(e.worker_stagger_ms);
            e.admission_threshold = section.admission_threshold.unwrap_or(e.admission_threshold);
            e.judge_batch_size = section.judge_batch_size.unwrap_or(e.judge_batch_size);
            e.max_judges = section.max_judges.unwrap_or(e.max_judges);
            e.search_limit = section.search_limit.unwrap_or(e.search_limit);
            e.max_leads_per_turn = section.max_leads_per_turn.unwrap_or(e.max_leads_per_turn);
            e.finding_window = section.finding_window.unwrap_or(e.finding_window);
            e.synthesis_interval_ms = section
                .synthesis_interval_ms
                .unwrap_or(e.synthesis_interval_ms);
        }
        if let Some(storage) = file.storage {
            if let Some(backend) = storage.backend {
                config.storage.backend = parse_backend(&backend)?;
            }
            config.storage.path = storage.path.map(PathBuf::from);
        }
        if let Some(llm) = file.llm {
            if let Some(provider) = llm.provider {
                config.llm.provider = parse_provider(&provider)?;
            }
            config.llm.model = llm.model;
            config.llm.api_key = llm.api_key.as_deref().and_then(expand_env_reference);
            config.llm.base_url = llm.base_url;
            config.llm.timeout_ms = llm.timeout_ms;
            config.llm.connect_timeout_ms = llm.connect_timeout_ms;
            config.llm.max_tokens = llm.max_tokens;
            config.llm.max_concurrent = llm.max_concurrent;
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        Ok(config)
    }

    /// Applies `TRAWL_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for values that do not parse.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Result<Option<T>> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse()
                        .map_err(|_| Error::InvalidInput(format!("{key}: cannot parse '{v}'")))
                })
                .transpose()
        }

        if let Some(v) = lookup("TRAWL_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TRAWL_HISTORY_DB") {
            self.history_db = Some(PathBuf::from(v));
        }
        let e = &mut self.exploration;
        if let Some(v) = parsed(&lookup, "TRAWL_MAX_ITERATIONS")? {
            e.max_iterations = v;
        }
        if let Some(v) = parsed(&lookup, "TRAWL_MAX_WORKERS")? {
            e.max_workers = v;
        }
        if let Some(v) = parsed(&lookup, "TRAWL_ADMISSION_THRESHOLD")? {
            e.admission_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "TRAWL_SYNTHESIS_INTERVAL_MS")? {
            e.synthesis_interval_ms = v;
        }
        if let Some(v) = lookup("TRAWL_STORAGE_BACKEND") {
            self.storage.backend = parse_backend(&v)?;
        }
        if let Some(v) = lookup("TRAWL_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TRAWL_LLM_PROVIDER") {
            self.llm.provider = parse_provider(&v)?;
        }
        if let Some(v) = lookup("TRAWL_LLM_MODEL") {
            self.llm.model = Some(v);
        }
        if let Some(v) = lookup("TRAWL_LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = lookup("TRAWL_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        Ok(self)
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Path of the durable session database.
    #[must_use]
    pub fn session_db_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("sessions.db"))
    }

    /// Path of the history database.
    #[must_use]
    pub fn history_db_path(&self) -> PathBuf {
        self.history_db
            .clone()
            .unwrap_or_else(|| self.data_dir.join("history.db"))
    }
}
