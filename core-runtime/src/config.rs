//! # Scheduler Configuration
//!
//! Provides configuration management for loop schedulers.
//!
//! ## Overview
//!
//! A [`SchedulerConfig`] carries everything a `LoopScheduler` needs besides
//! the loop runtime itself:
//!
//! - `name` - human-readable name, used for the worker thread and in logs
//! - `task_timeout` - how long blocking callers wait for a result by default
//! - `thread_stack_size` - optional stack size for the worker thread
//!
//! Configs are built with [`SchedulerConfigBuilder`], which validates eagerly
//! so that a bad value fails at construction rather than when the worker
//! thread is spawned.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::SchedulerConfig;
//! use std::time::Duration;
//!
//! let config = SchedulerConfig::builder()
//!     .name("io-loop")
//!     .task_timeout(Duration::from_secs(1))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.name, "io-loop");
//! assert_eq!(config.task_timeout, Duration::from_secs(1));
//! ```
//!
//! ## Environment Overrides
//!
//! [`SchedulerConfig::from_env`] starts from the defaults and applies
//! `LOOPTRAY_NAME` and `LOOPTRAY_TASK_TIMEOUT_SECS` when they are set.
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::SchedulerConfig;
//!
//! // A zero timeout would make every blocking call fail immediately.
//! let config = SchedulerConfig::builder()
//!     .task_timeout_secs(0.0)
//!     .build()
//!     .expect("Should fail - timeout must be positive");
//! ```

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Default time a blocking caller waits for a loop result.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default scheduler (and worker thread) name.
pub const DEFAULT_SCHEDULER_NAME: &str = "LoopScheduler";

/// Smallest worker stack size accepted by validation.
pub const MIN_THREAD_STACK_SIZE: usize = 64 * 1024;

/// Environment variable overriding the scheduler name.
pub const ENV_NAME: &str = "LOOPTRAY_NAME";

/// Environment variable overriding the default task timeout, in seconds.
pub const ENV_TASK_TIMEOUT_SECS: &str = "LOOPTRAY_TASK_TIMEOUT_SECS";

/// Configuration for a single loop scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Name used for the worker thread and in diagnostics
    pub name: String,

    /// Default caller-side wait for `run`/`await_value` style calls
    pub task_timeout: Duration,

    /// Worker thread stack size (platform default when `None`)
    pub thread_stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SCHEDULER_NAME.to_string(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            thread_stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Creates a new builder for constructing a `SchedulerConfig`.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Builds a configuration from the defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an override is present but malformed, or
    /// if the resulting configuration does not validate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(name) = lookup(ENV_NAME) {
            builder = builder.name(name);
        }

        if let Some(raw) = lookup(ENV_TASK_TIMEOUT_SECS) {
            let secs: f64 = raw.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a number of seconds, got '{}'",
                    ENV_TASK_TIMEOUT_SECS, raw
                ))
            })?;
            builder = builder.task_timeout_secs(secs);
        }

        builder.build()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The name is not empty and contains no NUL byte (thread names cannot)
    /// - The task timeout is greater than zero
    /// - The stack size, when set, is at least [`MIN_THREAD_STACK_SIZE`]
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Scheduler name cannot be empty".to_string()));
        }

        if self.name.contains('\0') {
            return Err(Error::Config(
                "Scheduler name cannot contain a NUL byte".to_string(),
            ));
        }

        if self.task_timeout.is_zero() {
            return Err(Error::Config(
                "Task timeout must be greater than zero".to_string(),
            ));
        }

        if let Some(size) = self.thread_stack_size {
            if size < MIN_THREAD_STACK_SIZE {
                return Err(Error::Config(format!(
                    "Thread stack size {} is below the minimum of {} bytes",
                    size, MIN_THREAD_STACK_SIZE
                )));
            }
        }

        Ok(())
    }
}

/// Builder for constructing [`SchedulerConfig`] instances.
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    name: Option<String>,
    task_timeout_secs: Option<f64>,
    thread_stack_size: Option<usize>,
}

impl SchedulerConfigBuilder {
    /// Sets the scheduler name.
    ///
    /// Default: `"LoopScheduler"`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the default task timeout.
    ///
    /// Default: 5 seconds
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    /// Sets the default task timeout in (fractional) seconds.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::SchedulerConfig;
    /// use std::time::Duration;
    ///
    /// let config = SchedulerConfig::builder()
    ///     .task_timeout_secs(1.5)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.task_timeout, Duration::from_millis(1500));
    /// ```
    pub fn task_timeout_secs(mut self, secs: f64) -> Self {
        self.task_timeout_secs = Some(secs);
        self
    }

    /// Sets the worker thread's stack size in bytes.
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Builds the final `SchedulerConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the timeout is negative, not finite, or
    /// too large to represent, or if [`SchedulerConfig::validate`] fails.
    pub fn build(self) -> Result<SchedulerConfig> {
        let task_timeout = match self.task_timeout_secs {
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|e| {
                Error::Config(format!("Invalid task timeout {}: {}", secs, e))
            })?,
            None => DEFAULT_TASK_TIMEOUT,
        };

        let config = SchedulerConfig {
            name: self
                .name
                .unwrap_or_else(|| DEFAULT_SCHEDULER_NAME.to_string()),
            task_timeout,
            thread_stack_size: self.thread_stack_size,
        };

        config.validate()?;

        Ok(config)
    }
}
