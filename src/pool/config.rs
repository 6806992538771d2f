//! Engine configuration

use crate::core::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Hard ceiling on worker threads. Requests above it are clamped.
pub const MAX_THREADS: usize = 64;

/// Processor affinity policy for worker threads.
///
/// Affinity is a best-effort hint: failures are logged, never returned.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityPolicy {
    /// Let the OS schedule workers freely
    #[default]
    None,
    /// Worker slot `i` prefers core `i % core_count`
    RoundRobin,
    /// Worker slot `i` prefers `cores[i % cores.len()]`
    Explicit(Vec<usize>),
}

impl AffinityPolicy {
    /// Core preferred by the worker in `slot`, if any
    pub fn core_for(&self, slot: usize) -> Option<usize> {
        match self {
            AffinityPolicy::None => None,
            AffinityPolicy::RoundRobin => Some(slot % num_cpus::get().max(1)),
            AffinityPolicy::Explicit(cores) if cores.is_empty() => None,
            AffinityPolicy::Explicit(cores) => Some(cores[slot % cores.len()]),
        }
    }
}

/// Configuration for a [`TaskEngine`](crate::TaskEngine)
///
/// # Example
///
/// ```rust
/// use task_engine::{AffinityPolicy, EngineConfig};
///
/// let config = EngineConfig::new(4)
///     .with_max_threads(16)
///     .with_thread_name_prefix("xbl-worker")
///     .with_affinity(AffinityPolicy::RoundRobin);
/// assert!(config.validate().is_ok());
///
/// let from_json = EngineConfig::from_json(r#"{ "initial_threads": 2, "max_threads": 8 }"#).unwrap();
/// assert_eq!(from_json.max_threads, 8);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Workers spawned by `start()`
    pub initial_threads: usize,
    /// Thread ceiling, itself capped at [`MAX_THREADS`]
    pub max_threads: usize,
    /// Worker thread name prefix
    pub thread_name_prefix: String,
    /// Processor affinity policy
    pub affinity: AffinityPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_threads: num_cpus::get().min(MAX_THREADS),
            max_threads: MAX_THREADS,
            thread_name_prefix: "task-worker".to_string(),
            affinity: AffinityPolicy::None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with `initial_threads` workers (0 = number of CPUs)
    #[must_use]
    pub fn new(initial_threads: usize) -> Self {
        let defaults = Self::default();
        Self {
            initial_threads: if initial_threads == 0 {
                defaults.initial_threads
            } else {
                initial_threads
            },
            ..defaults
        }
    }

    /// Initial thread count and ceiling in one call (0 initial = number of CPUs)
    #[must_use]
    pub fn with_limits(initial_threads: usize, max_threads: usize) -> Self {
        Self {
            max_threads,
            ..Self::new(initial_threads)
        }
    }

    /// Set the thread ceiling
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the worker thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the affinity policy
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_affinity(mut self, affinity: AffinityPolicy) -> Self {
        self.affinity = affinity;
        self
    }

    /// Parse a JSON configuration and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(EngineError::invalid_argument(
                "max_threads",
                "Thread ceiling must be greater than 0",
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(EngineError::invalid_argument(
                "thread_name_prefix",
                "Thread name prefix must not be empty",
            ));
        }
        Ok(())
    }

    /// Effective ceiling: `max_threads` capped at [`MAX_THREADS`]
    pub fn ceiling(&self) -> usize {
        self.max_threads.min(MAX_THREADS)
    }

    /// Clamp `requested` to the ceiling, logging when it had to be cut
    pub(crate) fn clamp_threads(&self, requested: usize) -> usize {
        let ceiling = self.ceiling();
        if requested > ceiling {
            log::warn!(
                "{}",
                EngineError::resource_exhausted(requested, ceiling)
            );
            ceiling
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_initial_means_cpu_count() {
        let config = EngineConfig::new(0);
        assert_eq!(config.initial_threads, num_cpus::get().min(MAX_THREADS));
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let config = EngineConfig::with_limits(1, 0);
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_ceiling_is_capped() {
        let config = EngineConfig::new(2).with_max_threads(500);
        assert_eq!(config.ceiling(), MAX_THREADS);
        assert_eq!(config.clamp_threads(1000), MAX_THREADS);
        assert_eq!(config.clamp_threads(3), 3);
    }

    #[test]
    fn test_from_json_with_affinity() {
        let config = EngineConfig::from_json(
            r#"{ "initial_threads": 3, "thread_name_prefix": "svc", "affinity": { "explicit": [0, 2] } }"#,
        )
        .expect("valid config");
        assert_eq!(config.initial_threads, 3);
        assert_eq!(config.max_threads, MAX_THREADS);
        assert_eq!(config.affinity, AffinityPolicy::Explicit(vec![0, 2]));
        assert_eq!(config.affinity.core_for(3), Some(2));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{ "max_threads": 0 }"#),
            Err(EngineError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_affinity_policies() {
        assert_eq!(AffinityPolicy::None.core_for(1), None);
        assert_eq!(AffinityPolicy::Explicit(vec![]).core_for(1), None);
        assert!(AffinityPolicy::RoundRobin.core_for(0).is_some());
    }
}
