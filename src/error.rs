// src/error.rs

//! Unified error handling for planwatch.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Result type alias for planwatch operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regular expression failed to compile
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A record could not be constructed (e.g. missing id)
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A persisted log, set or snapshot file is unreadable
    #[error("Corrupt state in {path}: {message}")]
    CorruptState { path: String, message: String },

    /// A whole pipeline stage failed; aborts the run and triggers rollback
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    /// Too many permanent failures in one run
    #[error(
        "Circuit breaker tripped: {failed}/{attempted} fetches failed ({failure_percent:.1}% > {threshold_percent}%)"
    )]
    BreakerTripped {
        attempted: usize,
        failed: usize,
        failure_percent: f64,
        threshold_percent: u8,
    },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a record construction error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord(message.into())
    }

    /// Create a corrupt-state error for the given file.
    pub fn corrupt(path: &Path, message: impl fmt::Display) -> Self {
        Self::CorruptState {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Create a stage failure.
    pub fn stage(stage: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Wrap any error as a failure of the named stage.
    ///
    /// Errors that already describe a stage failure are passed through.
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            e @ (Self::Stage { .. } | Self::BreakerTripped { .. }) => e,
            other => Self::stage(stage, other),
        }
    }
}

/// Error returned by a [`RecordFetcher`](crate::services::RecordFetcher) or
/// [`Classifier`](crate::services::Classifier) for a single attempt.
///
/// The variant selects the retry path: blocked attempts rotate and cool down,
/// transient ones back off briefly, permanent ones are not retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Anti-bot or rate-limit response
    #[error("blocked: {reason}")]
    Blocked { reason: String },

    /// Network hiccup, timeout, parse failure
    #[error("transient error: {reason}")]
    Transient { reason: String },

    /// Upstream definitively rejected the id
    #[error("permanent error: {reason}")]
    Permanent { reason: String },
}

impl FetchError {
    pub fn blocked(reason: impl fmt::Display) -> Self {
        Self::Blocked {
            reason: reason.to_string(),
        }
    }

    pub fn transient(reason: impl fmt::Display) -> Self {
        Self::Transient {
            reason: reason.to_string(),
        }
    }

    pub fn permanent(reason: impl fmt::Display) -> Self {
        Self::Permanent {
            reason: reason.to_string(),
        }
    }

    /// The human-readable reason carried by any variant.
    pub fn reason(&self) -> &str {
        match self {
            Self::Blocked { reason } | Self::Transient { reason } | Self::Permanent { reason } => {
                reason
            }
        }
    }
}
