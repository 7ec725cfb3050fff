// src/services/retry.rs

//! Per-item retry state machine.
//!
//! ```text
//! Attempting ──ok──────────────▶ Success
//!     │
//!     ├─blocked──▶ cooldown(seed × n), fresh token ──▶ Attempting
//!     │            (beyond max_block_retries: PermanentFailure)
//!     ├─transient─▶ fixed backoff ──▶ Attempting
//!     │            (after max_attempts: PermanentFailure)
//!     └─permanent─▶ PermanentFailure
//! ```
//!
//! Blocked attempts do not consume the transient budget; they have their
//! own limit.

use std::time::Duration;

use crate::error::FetchError;
use crate::models::{FetchOutcome, Record, RetryConfig};
use crate::services::{Annotator, RecordFetcher, RotationToken};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Sleep, then try again with a fresh rotation token
    Retry(Duration),
    /// Stop and record a failure placeholder
    GiveUp,
}

/// Failures seen so far for one id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Fetch calls issued
    pub attempts: u32,
    /// Blocked responses seen
    pub blocks: u32,
    /// Transient errors seen
    pub transient: u32,
}

/// Parameterized retry/backoff policy shared by every fetch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub transient_backoff: Duration,
    pub max_block_retries: u32,
    pub block_cooldown: Duration,
    /// Upper bound on a single fetch (plus classification) call
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            transient_backoff: Duration::from_millis(retry.transient_backoff_ms),
            max_block_retries: retry.max_block_retries,
            block_cooldown: Duration::from_millis(retry.block_cooldown_ms),
            attempt_timeout,
        }
    }

    /// Record `error` in `state` and decide the next step.
    pub fn on_error(&self, error: &FetchError, state: &mut RetryState) -> Step {
        match error {
            FetchError::Blocked { .. } => {
                state.blocks += 1;
                if state.blocks > self.max_block_retries {
                    Step::GiveUp
                } else {
                    Step::Retry(self.block_cooldown.saturating_mul(state.blocks))
                }
            }
            FetchError::Transient { .. } => {
                state.transient += 1;
                if state.transient >= self.max_attempts {
                    Step::GiveUp
                } else {
                    Step::Retry(self.transient_backoff)
                }
            }
            FetchError::Permanent { .. } => Step::GiveUp,
        }
    }

    /// Drive one id to a terminal outcome.
    ///
    /// Never returns an error: exhausted retries become a
    /// [`FetchOutcome::Failed`] placeholder.
    pub async fn run<F>(&self, id: &str, fetcher: &F, annotator: Option<&Annotator>) -> FetchOutcome
    where
        F: RecordFetcher + ?Sized,
    {
        let mut state = RetryState::default();
        loop {
            let token = RotationToken::fresh(id, state.attempts);
            state.attempts += 1;

            let error = match self.attempt(id, fetcher, annotator, &token).await {
                Ok(record) => return FetchOutcome::Ok(record),
                Err(error) => error,
            };

            match self.on_error(&error, &mut state) {
                Step::Retry(wait) => {
                    log::warn!(
                        "[{}] attempt {} failed ({}); retrying in {:?}",
                        id,
                        state.attempts,
                        error,
                        wait
                    );
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                }
                Step::GiveUp => {
                    log::warn!(
                        "[{}] giving up after {} attempts: {}",
                        id,
                        state.attempts,
                        error
                    );
                    return FetchOutcome::failed(id, error.to_string(), state.attempts);
                }
            }
        }
    }

    async fn attempt<F>(
        &self,
        id: &str,
        fetcher: &F,
        annotator: Option<&Annotator>,
        token: &RotationToken,
    ) -> Result<Record, FetchError>
    where
        F: RecordFetcher + ?Sized,
    {
        let work = async {
            let record = fetcher.fetch(id, token).await?;
            match annotator {
                Some(annotator) => annotator.annotate(record).await,
                None => Ok(record),
            }
        };

        match tokio::time::timeout(self.attempt_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::transient(format!(
                "timed out after {:?}",
                self.attempt_timeout
            ))),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            transient_backoff: Duration::ZERO,
            max_block_retries: 2,
            block_cooldown: Duration::ZERO,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    /// Replays a fixed script of results and remembers the tokens it saw.
    struct Scripted {
        script: Mutex<VecDeque<Result<(), FetchError>>>,
        tokens: Mutex<Vec<RotationToken>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<(), FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                tokens: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.tokens.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RecordFetcher for Scripted {
        async fn fetch(&self, id: &str, token: &RotationToken) -> Result<Record, FetchError> {
            self.tokens.lock().unwrap().push(token.clone());
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            next.map(|()| Record::new(id).unwrap())
        }
    }

    struct Hangs;

    #[async_trait]
    impl RecordFetcher for Hangs {
        async fn fetch(&self, _id: &str, _token: &RotationToken) -> Result<Record, FetchError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_block_cooldown_grows_with_block_count() {
        let policy = RetryPolicy {
            block_cooldown: Duration::from_secs(30),
            ..instant_policy()
        };
        let mut state = RetryState::default();
        let blocked = FetchError::blocked("HTTP 429");

        assert_eq!(policy.on_error(&blocked, &mut state), Step::Retry(Duration::from_secs(30)));
        assert_eq!(policy.on_error(&blocked, &mut state), Step::Retry(Duration::from_secs(60)));
        assert_eq!(policy.on_error(&blocked, &mut state), Step::GiveUp);
        assert_eq!(state.transient, 0);
    }

    #[test]
    fn test_blocks_do_not_consume_transient_budget() {
        let policy = instant_policy();
        let mut state = RetryState::default();
        policy.on_error(&FetchError::blocked("captcha"), &mut state);
        policy.on_error(&FetchError::blocked("captcha"), &mut state);
        assert!(matches!(
            policy.on_error(&FetchError::transient("reset"), &mut state),
            Step::Retry(_)
        ));
    }

    #[test]
    fn test_permanent_gives_up_immediately() {
        let mut state = RetryState::default();
        assert_eq!(
            instant_policy().on_error(&FetchError::permanent("HTTP 404"), &mut state),
            Step::GiveUp
        );
    }

    #[tokio::test]
    async fn test_success_after_block_rotates_token() {
        let fetcher = Scripted::new(vec![Err(FetchError::blocked("captcha")), Ok(())]);
        let outcome = instant_policy().run("7", &fetcher, None).await;

        assert!(outcome.is_ok());
        let tokens = fetcher.tokens.lock().unwrap();
        assert_eq!(tokens.len(), 2);
        assert_ne!(tokens[0], tokens[1]);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_yields_placeholder() {
        let fetcher = Scripted::new(vec![
            Err(FetchError::transient("reset")),
            Err(FetchError::transient("reset")),
            Err(FetchError::transient("reset")),
        ]);
        let outcome = instant_policy().run("7", &fetcher, None).await;

        assert_eq!(fetcher.calls(), 3);
        match outcome {
            FetchOutcome::Failed(failed) => {
                assert_eq!(failed.id, "7");
                assert_eq!(failed.attempts, 3);
                assert!(failed.reason.contains("reset"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_block_limit_is_separate() {
        let fetcher = Scripted::new(vec![Err(FetchError::blocked("429")); 3]);
        let outcome = instant_policy().run("7", &fetcher, None).await;
        assert!(!outcome.is_ok());
        // max_block_retries = 2 means three calls in total
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_stuck_fetch_times_out_as_transient() {
        let policy = RetryPolicy {
            max_attempts: 2,
            attempt_timeout: Duration::from_millis(20),
            ..instant_policy()
        };
        let outcome = policy.run("7", &Hangs, None).await;
        match outcome {
            FetchOutcome::Failed(failed) => {
                assert_eq!(failed.attempts, 2);
                assert!(failed.reason.contains("timed out"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
