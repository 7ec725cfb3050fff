// src/models/mod.rs

//! Domain models for planwatch.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod outcome;
mod record;
mod report;
mod snapshot;

// Re-export all public types
pub use config::{
    BreakerConfig, ClassifierConfig, Config, DiffConfig, FetcherConfig, ListKind, ListSpec,
    PathsConfig, PoolConfig, ProxyConfig, RetryConfig, SourceConfig, TrackedField,
};
pub use outcome::{FailedAttempt, FetchOutcome};
pub use record::{Classification, ItemKey, Record, SubItem};
pub use report::{Anchor, Change, ChangeReport, ReportSummary, Severity};
pub use snapshot::{Absorbed, Snapshot};
