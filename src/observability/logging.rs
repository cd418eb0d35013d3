//! Logging configuration.
//!
//! Resolution order for each setting: environment, then the `[logging]`
//! config section, then defaults. `--verbose` raises the default level to
//! `debug` but never overrides an explicit `RUST_LOG`.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name, defaulting to pretty for anything unknown.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
    /// Level filter.
    pub filter: EnvFilter,
}

impl Clone for LoggingConfig {
    fn clone(&self) -> Self {
        Self {
            format: self.format,
            file: self.file.clone(),
            filter: EnvFilter::new(self.filter.to_string()),
        }
    }
}

impl LoggingConfig {
    /// Builds the configuration from the environment and optional settings.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        Self::resolve(settings, verbose, |key| std::env::var(key).ok())
    }

    fn resolve(
        settings: Option<&LoggingSettings>,
        verbose: bool,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let format = lookup("TRAWL_LOG_FORMAT")
            .or_else(|| settings.and_then(|s| s.format.clone()))
            .map(|f| LogFormat::parse(&f))
            .unwrap_or_default();

        let file = lookup("TRAWL_LOG_FILE")
            .or_else(|| settings.and_then(|s| s.file.clone()))
            .filter(|f| !f.trim().is_empty())
            .map(PathBuf::from);

        let default_level = if verbose { "debug" } else { "info" };
        let directive = lookup("RUST_LOG")
            .or_else(|| settings.and_then(|s| s.level.clone()))
            .unwrap_or_else(|| default_level.to_string());
        let filter =
            EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(default_level));

        Self {
            format,
            file,
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::resolve(None, false, |_| None);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
        assert_eq!(config.filter.to_string(), "info");

        let verbose = LoggingConfig::resolve(None, true, |_| None);
        assert_eq!(verbose.filter.to_string(), "debug");
    }

    #[test]
    fn test_env_beats_settings() {
        let settings = LoggingSettings {
            format: Some("pretty".to_string()),
            level: Some("warn".to_string()),
            file: Some("/tmp/trawl.log".to_string()),
        };
        let config = LoggingConfig::resolve(Some(&settings), true, |key| match key {
            "TRAWL_LOG_FORMAT" => Some("JSON".to_string()),
            _ => None,
        });
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter.to_string(), "warn");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/trawl.log")));
    }

    #[test]
    fn test_bad_directive_falls_back() {
        let config = LoggingConfig::resolve(None, false, |key| {
            (key == "RUST_LOG").then(|| "trawl=loud".to_string())
        });
        assert_eq!(config.filter.to_string(), "info");
    }
}
