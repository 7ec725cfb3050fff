// src/services/pool.rs

//! Bounded concurrent fetching of a work queue.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::error::Result;
use crate::models::{Config, FetchOutcome};
use crate::services::{Annotator, RecordFetcher, RetryPolicy};
use crate::storage::StateStore;

/// Counters for one pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
    /// Ids in the work queue
    pub total: usize,
    /// Already processed or duplicated in the queue
    pub skipped: usize,
    /// Ids driven to a terminal outcome this run
    pub fetched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Appends that could not be written
    pub lost_appends: usize,
}

/// Fixed-size worker pool over a shared queue of ids.
///
/// Workers share nothing but the [`StateStore`]; each id carries its own
/// retry context.
pub struct FetchPool {
    fetcher: Arc<dyn RecordFetcher>,
    annotator: Option<Annotator>,
    policy: RetryPolicy,
    workers: usize,
    progress_every: usize,
}

impl FetchPool {
    /// Create a pool configured from `config`.
    pub fn new(fetcher: Arc<dyn RecordFetcher>, config: &Config) -> Self {
        Self {
            fetcher,
            annotator: None,
            policy: RetryPolicy::from_config(&config.retry, config.fetcher.timeout()),
            workers: config.pool.workers.max(1),
            progress_every: config.pool.progress_every.max(1),
        }
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Classify each fetched record before it is logged.
    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetch every id not yet in the ProcessedSet.
    ///
    /// Each terminal outcome, success or failure, is appended to the log
    /// and its id marked processed. State write failures are logged and
    /// counted, never fatal. Returns once every worker has finished, so
    /// all appends are on disk before the caller compacts.
    pub async fn run(&self, ids: &[String], state: &StateStore) -> Result<PoolSummary> {
        let processed = state.load_processed().await?;

        let mut summary = PoolSummary {
            total: ids.len(),
            ..PoolSummary::default()
        };

        let mut queued = HashSet::new();
        let pending: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| !processed.contains(*id) && queued.insert(*id))
            .collect();
        summary.skipped = ids.len() - pending.len();

        log::info!(
            "Fetching {} ids with {} workers ({} already processed)",
            pending.len(),
            self.workers,
            summary.skipped
        );
        if pending.is_empty() {
            return Ok(summary);
        }

        let to_fetch = pending.len();
        let mut results = stream::iter(pending)
            .map(|id| self.process(id, state))
            .buffer_unordered(self.workers);

        while let Some((ok, appended)) = results.next().await {
            summary.fetched += 1;
            if ok {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            if !appended {
                summary.lost_appends += 1;
            }

            if summary.fetched % self.progress_every == 0 && summary.fetched < to_fetch {
                log::info!(
                    "Progress: {}/{} ({} ok, {} failed)",
                    summary.fetched,
                    to_fetch,
                    summary.succeeded,
                    summary.failed
                );
            }
        }

        log::info!(
            "Fetched {}/{} ({} ok, {} failed)",
            summary.fetched,
            to_fetch,
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    /// One worker task: retry to a terminal outcome, then persist it.
    async fn process(&self, id: &str, state: &StateStore) -> (bool, bool) {
        let outcome: FetchOutcome = self
            .policy
            .run(id, self.fetcher.as_ref(), self.annotator.as_ref())
            .await;
        let ok = outcome.is_ok();

        let appended = match state.append_outcome(&outcome).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to append outcome for {}: {}", id, e);
                false
            }
        };
        if let Err(e) = state.mark_processed(id).await {
            log::error!("Failed to mark {} processed: {}", id, e);
        }

        (ok, appended)
    }
}
