//! Engine and queue configuration

use crate::errors::AggregateResult;
use clinica_core::reliability::duration_ms;
use clinica_core::{ClinicaError, ConfigValidation, ConfigValidator, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "CLINICA_AGGREGATES_";

/// Settings for the recompute engine and its worker queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker tasks draining the queue
    pub workers: usize,
    /// Pending jobs each worker buffers before submission waits
    pub queue_capacity: usize,
    /// Deadline for a single recompute attempt
    #[serde(with = "duration_ms")]
    pub attempt_timeout: Duration,
    /// Backoff for transient failures and timeouts
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            attempt_timeout: Duration::from_secs(5),
            retry: RetryPolicy::exponential().with_max_attempts(5),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML file
    pub fn load(path: &Path) -> AggregateResult<Self> {
        Ok(clinica_core::load_toml(path)?)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> AggregateResult<Self> {
        Ok(clinica_core::parse_toml(content)?)
    }

    /// Apply `CLINICA_AGGREGATES_*` environment overrides
    pub fn merge_with_env(&mut self) -> Result<(), ClinicaError> {
        self.merge_with_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, then revalidate
    ///
    /// Recognized keys: `WORKERS`, `QUEUE_CAPACITY`, `ATTEMPT_TIMEOUT_MS`,
    /// `MAX_ATTEMPTS`. On error `self` is left unchanged.
    pub fn merge_with_vars<F>(&mut self, lookup: F) -> Result<(), ClinicaError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> Result<Option<u64>, ClinicaError> {
            let name = format!("{ENV_PREFIX}{key}");
            lookup(&name)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|_| {
                        ClinicaError::config(format!("Invalid number in {name}: {raw}"))
                    })
                })
                .transpose()
        };
        let out_of_range =
            |key: &str| ClinicaError::config(format!("{ENV_PREFIX}{key} out of range"));

        let mut merged = self.clone();
        if let Some(workers) = read("WORKERS")? {
            merged.workers = usize::try_from(workers).map_err(|_| out_of_range("WORKERS"))?;
        }
        if let Some(capacity) = read("QUEUE_CAPACITY")? {
            merged.queue_capacity =
                usize::try_from(capacity).map_err(|_| out_of_range("QUEUE_CAPACITY"))?;
        }
        if let Some(timeout) = read("ATTEMPT_TIMEOUT_MS")? {
            merged.attempt_timeout = Duration::from_millis(timeout);
        }
        if let Some(attempts) = read("MAX_ATTEMPTS")? {
            merged.retry.max_attempts =
                u32::try_from(attempts).map_err(|_| out_of_range("MAX_ATTEMPTS"))?;
        }

        merged.validate()?;
        *self = merged;
        Ok(())
    }
}

impl ConfigValidation for EngineConfig {
    fn validate(&self) -> Result<(), ClinicaError> {
        let mut validator = ConfigValidator::new();
        validator
            .range("workers", self.workers as f64, Some(1.0), Some(256.0))
            .range("queue_capacity", self.queue_capacity as f64, Some(1.0), None)
            .check(
                "attempt_timeout",
                !self.attempt_timeout.is_zero(),
                "attempt timeout must be positive",
            )
            .range(
                "retry.max_attempts",
                f64::from(self.retry.max_attempts),
                Some(1.0),
                Some(100.0),
            )
            .check(
                "retry.max_delay",
                self.retry.max_delay >= self.retry.initial_delay,
                "max delay must not be below the initial delay",
            );
        Ok(validator.result()?)
    }
}
