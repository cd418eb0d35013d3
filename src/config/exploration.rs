//! Exploration tuning.

use crate::{Error, Result};
use std::time::Duration;

/// Tuning knobs for one exploration session.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorationConfig {
    /// Iterations before the loop gives up.
    ///
    /// Default: 5.
    pub max_iterations: u32,
    /// Workers started per iteration (fewer if the queue is shorter).
    ///
    /// Default: 5.
    pub max_workers: usize,
    /// Delay between consecutive worker starts.
    ///
    /// Default: 100ms.
    pub worker_stagger_ms: u64,
    /// Judge score an item needs to be queued.
    ///
    /// Default: 7.0.
    pub admission_threshold: f32,
    /// Items per judge before another judge is added.
    ///
    /// Default: 10.
    pub judge_batch_size: usize,
    /// Judges per iteration; batches grow once this is reached.
    ///
    /// Default: 16.
    pub max_judges: usize,
    /// Results requested from the search backend per request.
    ///
    /// Default: 25.
    pub search_limit: usize,
    /// High-priority leads forwarded per analyzed turn.
    ///
    /// Default: 2.
    pub max_leads_per_turn: usize,
    /// Most recent peer findings shown to each turn analysis.
    ///
    /// Default: 10.
    pub finding_window: usize,
    /// Synthesizer tick period.
    ///
    /// Default: 2000ms.
    pub synthesis_interval_ms: u64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_workers: 5,
            worker_stagger_ms: 100,
            admission_threshold: 7.0,
            judge_batch_size: 10,
            max_judges: 16,
            search_limit: 25,
            max_leads_per_turn: 2,
            finding_window: 10,
            synthesis_interval_ms: 2_000,
        }
    }
}

impl ExplorationConfig {
    /// Worker start stagger as a duration.
    #[must_use]
    pub const fn worker_stagger(&self) -> Duration {
        Duration::from_millis(self.worker_stagger_ms)
    }

    /// Synthesizer period as a duration.
    #[must_use]
    pub const fn synthesis_interval(&self) -> Duration {
        Duration::from_millis(self.synthesis_interval_ms)
    }

    /// Sets the iteration cap.
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the worker cap.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the worker stagger.
    #[must_use]
    pub const fn with_worker_stagger_ms(mut self, stagger_ms: u64) -> Self {
        self.worker_stagger_ms = stagger_ms;
        self
    }

    /// Sets the synthesizer period.
    #[must_use]
    pub const fn with_synthesis_interval_ms(mut self, interval_ms: u64) -> Self {
        self.synthesis_interval_ms = interval_ms;
        self
    }

    /// Checks that every knob is usable.
    ///
    /// `max_iterations = 0` is allowed and ends a session right after seeding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidInput(format!("exploration.{msg}")));
        if self.max_workers == 0 {
            return invalid("max_workers must be at least 1");
        }
        if self.judge_batch_size == 0 {
            return invalid("judge_batch_size must be at least 1");
        }
        if self.max_judges == 0 {
            return invalid("max_judges must be at least 1");
        }
        if self.search_limit == 0 {
            return invalid("search_limit must be at least 1");
        }
        if !(0.0..=10.0).contains(&self.admission_threshold) {
            return invalid("admission_threshold must be within [0, 10]");
        }
        if self.synthesis_interval_ms == 0 {
            return invalid("synthesis_interval_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_defaults_are_valid() {
        let config = ExplorationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_stagger(), Duration::from_millis(100));
        assert_eq!(config.synthesis_interval(), Duration::from_secs(2));
    }

    #[test_case(ExplorationConfig { max_workers: 0, ..Default::default() } ; "no workers")]
    #[test_case(ExplorationConfig { judge_batch_size: 0, ..Default::default() } ; "empty batches")]
    #[test_case(ExplorationConfig { max_judges: 0, ..Default::default() } ; "no judges")]
    #[test_case(ExplorationConfig { admission_threshold: 10.5, ..Default::default() } ; "threshold above scale")]
    #[test_case(ExplorationConfig { synthesis_interval_ms: 0, ..Default::default() } ; "busy synthesizer")]
    fn test_invalid_values(config: ExplorationConfig) {
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_zero_iterations_allowed() {
        assert!(ExplorationConfig::default().with_max_iterations(0).validate().is_ok());
    }
}
