//! Circuit Breaker pattern implementation.
//!
//! Aborts a run when too many fetches ended as permanent failures. A run
//! where most ids fail usually means the upstream blocked us wholesale;
//! rolling back leaves those ids unprocessed so the next run retries them.

use crate::error::{AppError, Result};
use crate::models::BreakerConfig;
use crate::services::PoolSummary;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Maximum allowed failure percentage (0-100). Default: 50%
    pub max_failure_percent: u8,
    /// Below this many attempted ids the check is skipped.
    pub min_attempts: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            max_failure_percent: config.max_failure_percent,
            min_attempts: config.min_attempts,
        }
    }
}

/// Circuit breaker over one run's fetch results.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

/// Result of circuit breaker check.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerResult {
    /// Safe to proceed
    Safe { attempted: usize, failed: usize },
    /// Too few attempts to judge
    BelowMinimum { attempted: usize },
    /// Circuit breaker triggered - abort the run
    Triggered {
        attempted: usize,
        failed: usize,
        failure_percent: f64,
    },
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, attempted: usize, failed: usize) -> CircuitBreakerResult {
        if attempted == 0 || attempted < self.config.min_attempts {
            return CircuitBreakerResult::BelowMinimum { attempted };
        }

        let failure_percent = failed as f64 * 100.0 / attempted as f64;
        if failure_percent > self.config.max_failure_percent as f64 {
            return CircuitBreakerResult::Triggered {
                attempted,
                failed,
                failure_percent,
            };
        }

        CircuitBreakerResult::Safe { attempted, failed }
    }

    /// Validate a pool run; Err if the circuit breaker triggered.
    pub fn validate(&self, summary: &PoolSummary) -> Result<()> {
        match self.check(summary.fetched, summary.failed) {
            CircuitBreakerResult::Safe { attempted, failed } => {
                log::info!(
                    "Circuit breaker: SAFE ({} of {} fetches failed)",
                    failed,
                    attempted
                );
                Ok(())
            }
            CircuitBreakerResult::BelowMinimum { attempted } => {
                log::info!(
                    "Circuit breaker: SKIPPED ({} fetches, below minimum of {})",
                    attempted,
                    self.config.min_attempts
                );
                Ok(())
            }
            CircuitBreakerResult::Triggered {
                attempted,
                failed,
                failure_percent,
            } => {
                log::error!(
                    "Circuit breaker: TRIGGERED! {}/{} fetches failed ({:.1}% > {}% threshold)",
                    failed,
                    attempted,
                    failure_percent,
                    self.config.max_failure_percent
                );
                Err(AppError::BreakerTripped {
                    attempted,
                    failed,
                    failure_percent,
                    threshold_percent: self.config.max_failure_percent,
                })
            }
        }
    }
}
