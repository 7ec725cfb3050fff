//! Service layer for fetching records.
//!
//! This module contains:
//! - Fetch and classify boundaries (`RecordFetcher`, `Classifier`)
//! - The per-item retry state machine (`RetryPolicy`)
//! - The bounded worker pool (`FetchPool`)
//! - Reference HTTP adapters (`HttpFetcher`, `HttpClassifier`)

mod fetcher;
mod http;
mod pool;
mod retry;

pub use fetcher::{Annotator, Classifier, RecordFetcher, RotationToken};
pub use http::{HttpClassifier, HttpFetcher, JsonExtractor, PageExtractor};
pub use pool::{FetchPool, PoolSummary};
pub use retry::{RetryPolicy, RetryState, Step};
