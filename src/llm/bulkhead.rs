//! Bulkhead (concurrency limiting) for LLM calls.
//!
//! Judges, workers and the synthesizer all call the collaborator from their
//! own threads. The bulkhead caps how many of those calls are in flight at
//! once so a wide iteration does not trip provider rate limits.
//!
//! ```rust,ignore
//! use trawl::llm::{AnthropicClient, BulkheadConfig, BulkheadLlmProvider};
//!
//! let bulkhead = BulkheadLlmProvider::new(AnthropicClient::new(), BulkheadConfig::default());
//! let reply = bulkhead.complete("Hello")?;
//! ```

use super::LlmProvider;
use crate::config::LlmConfig;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Poll interval while waiting for a permit.
const ACQUIRE_POLL: Duration = Duration::from_millis(10);

/// Configuration for the bulkhead pattern.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum concurrent LLM calls allowed.
    ///
    /// Default: 8.
    pub max_concurrent: usize,

    /// Timeout for acquiring a permit (0 = wait indefinitely).
    ///
    /// Default: 120 seconds.
    pub acquire_timeout_ms: u64,

    /// Whether to fail immediately when the bulkhead is full.
    ///
    /// Default: false (wait for permit).
    pub fail_fast: bool,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkheadConfig {
    /// Creates a new bulkhead configuration with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_concurrent: 8,
            acquire_timeout_ms: 120_000,
            fail_fast: false,
        }
    }

    /// Loads configuration from the `[llm]` config section.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut settings = Self::new();
        if let Some(max_concurrent) = config.max_concurrent {
            settings.max_concurrent = max_concurrent.max(1);
        }
        settings
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `TRAWL_LLM_MAX_CONCURRENT` | Max concurrent calls | 8 |
    /// | `TRAWL_LLM_ACQUIRE_TIMEOUT_MS` | Permit timeout | 120000 |
    /// | `TRAWL_LLM_FAIL_FAST` | Fail when full | false |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("TRAWL_LLM_MAX_CONCURRENT") {
            if let Ok(parsed) = v.parse::<usize>() {
                self.max_concurrent = parsed.max(1);
            }
        }
        if let Ok(v) = std::env::var("TRAWL_LLM_ACQUIRE_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.acquire_timeout_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("TRAWL_LLM_FAIL_FAST") {
            self.fail_fast = v.eq_ignore_ascii_case("true") || v == "1";
        }
        self
    }

    /// Sets the maximum concurrent calls.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the acquire timeout in milliseconds.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Sets whether to fail fast when the bulkhead is full.
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// LLM provider wrapper that limits concurrent calls.
pub struct BulkheadLlmProvider<P: LlmProvider> {
    inner: P,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
}

impl<P: LlmProvider> BulkheadLlmProvider<P> {
    /// Creates a new bulkhead-wrapped LLM provider.
    #[must_use]
    pub fn new(inner: P, config: BulkheadConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner,
            config,
            semaphore,
        }
    }

    /// Returns the current number of available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn reject(&self, reason: &'static str, cause: String) -> Error {
        metrics::counter!(
            "llm_bulkhead_rejections_total",
            "provider" => self.inner.name(),
            "reason" => reason
        )
        .increment(1);
        Error::collaborator("llm_bulkhead_acquire", cause)
    }

    /// Acquires a permit, respecting the timeout and fail-fast settings.
    ///
    /// Callers are plain OS threads, so the async semaphore is polled with
    /// `try_acquire_owned` instead of awaited.
    fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        #[allow(clippy::cast_precision_loss)]
        let available = self.available_permits() as f64;
        metrics::gauge!(
            "llm_bulkhead_available_permits",
            "provider" => self.inner.name()
        )
        .set(available);

        let start = Instant::now();
        let timeout = Duration::from_millis(self.config.acquire_timeout_ms);
        loop {
            if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
                metrics::counter!(
                    "llm_bulkhead_permits_acquired_total",
                    "provider" => self.inner.name()
                )
                .increment(1);
                return Ok(permit);
            }

            if self.config.fail_fast {
                return Err(self.reject(
                    "full",
                    format!(
                        "Bulkhead full: {} concurrent calls in progress",
                        self.config.max_concurrent
                    ),
                ));
            }
            if self.config.acquire_timeout_ms > 0 && start.elapsed() >= timeout {
                return Err(self.reject(
                    "timeout",
                    format!(
                        "Bulkhead acquire timed out after {}ms",
                        self.config.acquire_timeout_ms
                    ),
                ));
            }
            std::thread::sleep(ACQUIRE_POLL);
        }
    }

    /// Executes an operation with bulkhead protection.
    fn execute<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let provider = self.inner.name();
        let span = tracing::debug_span!(
            "llm.bulkhead",
            provider = provider,
            operation = operation,
            available_permits = self.available_permits()
        );
        let _enter = span.enter();

        let _permit = self.acquire_permit()?;
        let start = Instant::now();
        let result = call();

        metrics::histogram!(
            "llm_request_duration_ms",
            "provider" => provider,
            "status" => if result.is_ok() { "success" } else { "error" }
        )
        .record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::debug!(
            provider = provider,
            operation = operation,
            success = result.is_ok(),
            "Released bulkhead permit"
        );

        result
    }
}

impl<P: LlmProvider> LlmProvider for BulkheadLlmProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.execute("complete", || self.inner.complete(prompt))
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.execute("complete_with_system", || {
            self.inner.complete_with_system(system, user)
        })
    }
}
