//! Fetch outcomes, the unit written to the append log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Record;

/// Result of attempting one id.
///
/// Serialized flat with a `status` tag so one outcome is one log line:
/// `{"status":"ok","id":"..",...}` or `{"status":"failed","id":"..",...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Ok(Record),
    Failed(FailedAttempt),
}

impl FetchOutcome {
    /// Build a failure placeholder stamped with the current time.
    pub fn failed(id: impl Into<String>, reason: impl Into<String>, attempts: u32) -> Self {
        Self::Failed(FailedAttempt {
            id: id.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
            attempts,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Ok(record) => record.id(),
            Self::Failed(failed) => &failed.id,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Ok(record) => Some(record),
            Self::Failed(_) => None,
        }
    }
}

/// Placeholder for an id whose retries were exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}
