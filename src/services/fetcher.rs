// src/services/fetcher.rs

//! Boundaries to the external fetch and classification capabilities.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::FetchError;
use crate::models::{Classification, Record};

/// Per-attempt session identity.
///
/// A new token is minted for every attempt, never shared between workers,
/// so retries of one id are not correlated with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RotationToken(String);

static MINTED: AtomicU64 = AtomicU64::new(0);

impl RotationToken {
    /// Mint a token for one attempt at `id`.
    pub fn fresh(id: &str, attempt: u32) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let sequence = MINTED.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        hasher.update(attempt.to_le_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(sequence.to_le_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RotationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fetches one record per call.
///
/// Implementations are shared by all workers and must be safe to call
/// concurrently. Return [`FetchError::Blocked`] for anti-bot or rate-limit
/// responses so the retry policy can rotate and cool down.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch(&self, id: &str, token: &RotationToken) -> Result<Record, FetchError>;
}

/// Optional annotation step applied to a fetched record before it is logged.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, FetchError>;
}

/// Applies a [`Classifier`] to one configured text field of a record.
#[derive(Clone)]
pub struct Annotator {
    classifier: Arc<dyn Classifier>,
    text_field: String,
}

impl Annotator {
    pub fn new(classifier: Arc<dyn Classifier>, text_field: impl Into<String>) -> Self {
        Self {
            classifier,
            text_field: text_field.into(),
        }
    }

    /// Attach a classification to `record`.
    ///
    /// Records without usable text in the configured field are passed
    /// through unannotated.
    pub async fn annotate(&self, mut record: Record) -> Result<Record, FetchError> {
        let text = match record.field(&self.text_field) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        if text.is_empty() {
            log::debug!("No '{}' text for {}; not classified", self.text_field, record.id());
            return Ok(record);
        }

        // Any classifier failure is retryable
        let classification = self
            .classifier
            .classify(&text)
            .await
            .map_err(|e| FetchError::transient(format!("classifier: {}", e.reason())))?;
        record.classification = Some(classification);
        Ok(record)
    }
}

impl fmt::Debug for Annotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotator")
            .field("text_field", &self.text_field)
            .finish_non_exhaustive()
    }
}
