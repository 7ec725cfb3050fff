//! Pipeline stages and entry points.
//!
//! - `run_pipeline`: Fetch, check, compact and diff under backup supervision
//! - `compact_pending` / `diff_dates`: Single stages for manual recovery
//! - `build_unified_report`: Combine several sources' daily reports

pub mod circuit_breaker;
pub mod diff;
pub mod run;
pub mod supervisor;
pub mod unified;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerResult};
pub use diff::{DiffCalculator, diff_history, diff_keyed, diff_staged};
pub use run::{Compaction, RunOptions, RunSummary, compact_pending, diff_dates, run_pipeline};
pub use supervisor::Supervisor;
pub use unified::{
    ReportSource, SourceStatus, UnifiedReport, build_unified_report, write_unified_report,
};
