//! Job system configuration

use crate::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default per-queue capacity (1024 ready jobs)
pub const DEFAULT_QUEUE_CAPACITY: usize = 1 << 10;

/// Default idle park timeout in microseconds
pub const DEFAULT_PARK_TIMEOUT_US: u64 = 100;

/// Configuration for a [`JobSystem`](crate::JobSystem)
///
/// Every field has a default, so a TOML document only needs the keys it
/// overrides:
///
/// ```toml
/// thread_count = 8
/// queue_capacity = 4096
/// logging = true
/// trace_path = "trace.json"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSystemConfig {
    /// Number of worker threads (0 = one per CPU core)
    pub thread_count: usize,

    /// Capacity of every bounded queue (worker deques, pinned inboxes, global injector)
    pub queue_capacity: usize,

    /// Worker thread name prefix; the worker index is appended
    pub thread_name_prefix: String,

    /// How long an idle worker parks before sweeping the queues again
    pub park_timeout_us: u64,

    /// Record execution trace events from startup
    pub logging: bool,

    /// Where to write the Chrome trace at shutdown (only when logging is on)
    pub trace_path: Option<PathBuf>,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            thread_count: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name_prefix: "jobweave-worker".to_string(),
            park_timeout_us: DEFAULT_PARK_TIMEOUT_US,
            logging: false,
            trace_path: None,
        }
    }
}

impl JobSystemConfig {
    /// Create a configuration with `thread_count` workers and defaults elsewhere
    pub fn new(thread_count: usize) -> Self {
        Self {
            thread_count,
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML
    pub fn from_toml_str(source: &str) -> JobResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| JobError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the per-queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the idle park timeout
    pub fn with_park_timeout_us(mut self, micros: u64) -> Self {
        self.park_timeout_us = micros;
        self
    }

    /// Enable trace recording from startup
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Save the trace to `path` at shutdown
    pub fn with_trace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_path = Some(path.into());
        self
    }

    /// Number of workers after resolving `0` to the CPU count
    pub fn resolved_thread_count(&self) -> usize {
        if self.thread_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.thread_count
        }
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> JobResult<()> {
        if self.queue_capacity == 0 {
            return Err(JobError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.park_timeout_us == 0 {
            return Err(JobError::InvalidConfig(
                "park_timeout_us must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = JobSystemConfig::default();
        assert_eq!(config.thread_count, 0);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.park_timeout_us, DEFAULT_PARK_TIMEOUT_US);
        assert!(!config.logging);
        assert!(config.trace_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_resolved_thread_count() {
        assert_eq!(JobSystemConfig::new(3).resolved_thread_count(), 3);
        assert_eq!(
            JobSystemConfig::new(0).resolved_thread_count(),
            num_cpus::get().max(1)
        );
    }

    #[test]
    fn test_config_from_toml_partial() {
        let config = JobSystemConfig::from_toml_str(
            r#"
            thread_count = 6
            logging = true
            trace_path = "out/trace.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.thread_count, 6);
        assert!(config.logging);
        assert_eq!(config.trace_path, Some(PathBuf::from("out/trace.json")));
        // Untouched keys keep their defaults
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.thread_name_prefix, "jobweave-worker");
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let err = JobSystemConfig::from_toml_str("queue_capacity = 0").unwrap_err();
        assert!(matches!(err, JobError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_malformed_toml() {
        let err = JobSystemConfig::from_toml_str("thread_count = \"many\"").unwrap_err();
        assert!(matches!(err, JobError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_builder() {
        let config = JobSystemConfig::new(2)
            .with_queue_capacity(8)
            .with_thread_name_prefix("sim")
            .with_park_timeout_us(50)
            .with_logging(true)
            .with_trace_path("t.json");

        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.thread_name_prefix, "sim");
        assert_eq!(config.park_timeout_us, 50);
        assert!(config.logging);
        assert_eq!(config.trace_path, Some(PathBuf::from("t.json")));
    }
}
