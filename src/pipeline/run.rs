// src/pipeline/run.rs

//! Supervised fetch → compact → save → diff run.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{ChangeReport, Config, Snapshot};
use crate::pipeline::{CircuitBreaker, CircuitBreakerConfig, DiffCalculator, Supervisor};
use crate::services::{Annotator, FetchPool, PoolSummary, RecordFetcher, RetryPolicy};
use crate::storage::{CompactStats, SnapshotStore, StateStore};
use crate::utils::log::{header, step, sub_item, summary};

const TOTAL_STEPS: usize = 4;

/// Per-run knobs that are not part of the configuration file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub date: NaiveDate,
    pub annotator: Option<Annotator>,
    /// Overrides the policy derived from `[retry]`
    pub policy: Option<RetryPolicy>,
}

impl RunOptions {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            annotator: None,
            policy: None,
        }
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub pool: PoolSummary,
    pub compaction: Option<CompactStats>,
    pub snapshot_path: Option<PathBuf>,
    pub previous_date: Option<NaiveDate>,
    pub report_path: Option<PathBuf>,
    /// Ids with at least one change
    pub changed_records: usize,
}

/// Result of folding the pending log into a dated snapshot.
#[derive(Debug)]
pub struct Compaction {
    pub snapshot: Snapshot,
    pub stats: CompactStats,
    pub path: PathBuf,
}

/// Run the full pipeline for `ids` under backup/rollback supervision.
///
/// Any stage failure restores every critical file, deletes the run's dated
/// outputs and is returned to the caller. An invalid `config` is rejected
/// before any file is touched.
pub async fn run_pipeline(
    config: &Config,
    fetcher: Arc<dyn RecordFetcher>,
    ids: &[String],
    options: RunOptions,
) -> Result<RunSummary> {
    config.validate()?;
    header(&format!(
        "planwatch: {} run for {}",
        config.source.name, options.date
    ));

    let state = StateStore::from_paths(&config.paths);
    let store = SnapshotStore::from_paths(&config.paths)?;

    let critical = critical_files(config, &state, &store, options.date).await?;
    let supervisor = Supervisor::begin(
        config.paths.backup_path(),
        &critical,
        store.dated_outputs(options.date),
    )
    .await?;

    let summary = supervisor
        .supervise(run_stages(config, fetcher, ids, &options, &state, &store))
        .await?;

    summary_block(config, &summary);
    Ok(summary)
}

async fn run_stages(
    config: &Config,
    fetcher: Arc<dyn RecordFetcher>,
    ids: &[String],
    options: &RunOptions,
    state: &StateStore,
    store: &SnapshotStore,
) -> Result<RunSummary> {
    let mut run = RunSummary::default();

    step(1, TOTAL_STEPS, "Fetch - retrieving unprocessed records");
    let mut pool = FetchPool::new(fetcher, config);
    if let Some(policy) = &options.policy {
        pool = pool.with_policy(policy.clone());
    }
    if let Some(annotator) = &options.annotator {
        pool = pool.with_annotator(annotator.clone());
    }
    run.pool = pool
        .run(ids, state)
        .await
        .map_err(|e| e.in_stage("fetch"))?;

    step(2, TOTAL_STEPS, "Check - failure circuit breaker");
    if config.breaker.enabled {
        CircuitBreaker::with_config(CircuitBreakerConfig::from(&config.breaker))
            .validate(&run.pool)?;
    } else {
        log::info!("Circuit breaker disabled");
    }

    if !state.has_pending_log() {
        log::info!("Nothing to do: no new outcomes to compact");
        return Ok(run);
    }

    step(3, TOTAL_STEPS, "Compact - folding the log into today's snapshot");
    let compaction = compact_pending(state, store, options.date)
        .await
        .map_err(|e| e.in_stage("compact"))?;
    run.compaction = Some(compaction.stats);
    run.snapshot_path = Some(compaction.path);

    step(4, TOTAL_STEPS, "Diff - comparing with the previous snapshot");
    let calculator = DiffCalculator::new(config.diff.clone());
    run.previous_date = store
        .latest_before(options.date)
        .await
        .map_err(|e| e.in_stage("diff"))?;
    if let Some(previous_date) = run.previous_date {
        let (report, path) = diff_dates(store, &calculator, previous_date, &compaction.snapshot)
            .await
            .map_err(|e| e.in_stage("diff"))?;
        run.changed_records = report.change_count();
        run.report_path = path;
    } else {
        log::info!("No previous snapshot; skipping diff");
    }

    Ok(run)
}

/// Fold the pending log onto the newest snapshot up to `date` and save it.
///
/// The log is deleted only after the snapshot is on disk, so a failed
/// compaction can simply be retried.
pub async fn compact_pending(
    state: &StateStore,
    store: &SnapshotStore,
    date: NaiveDate,
) -> Result<Compaction> {
    let (compacted, stats) = state.compact(date).await?;
    sub_item(&format!(
        "{} outcomes for {} ids ({} corrupt lines skipped)",
        stats.lines,
        compacted.len(),
        stats.skipped
    ));

    let base_date = store.latest_until(date).await?;
    let snapshot = match base_date {
        Some(base_date) => match store.load_snapshot(base_date).await? {
            Some(base) => {
                sub_item(&format!("Merging onto snapshot of {}", base_date));
                Snapshot::merge(&base, compacted.into_outcomes(), date)
            }
            None => compacted,
        },
        None => compacted,
    };

    let path = store.write_snapshot(&snapshot).await?;
    state.remove_log().await?;

    Ok(Compaction {
        snapshot,
        stats,
        path,
    })
}

/// Diff `new` against the snapshot stored for `old_date`, writing the
/// report when anything changed.
pub async fn diff_dates(
    store: &SnapshotStore,
    calculator: &DiffCalculator,
    old_date: NaiveDate,
    new: &Snapshot,
) -> Result<(ChangeReport, Option<PathBuf>)> {
    let old = store.load_snapshot(old_date).await?.unwrap_or_else(|| {
        log::warn!("Snapshot for {} vanished; diffing against empty", old_date);
        Snapshot::new(old_date)
    });

    let report = calculator.calculate(&old, new);
    if !report.has_changes() {
        log::info!("No changes between {} and {}", old_date, new.date);
        return Ok((report, None));
    }

    let path = store.write_report(&report).await?;
    Ok((report, Some(path)))
}

/// Files restored verbatim if the run fails.
async fn critical_files(
    config: &Config,
    state: &StateStore,
    store: &SnapshotStore,
    date: NaiveDate,
) -> Result<Vec<PathBuf>> {
    let mut files = vec![
        state.processed_path().to_path_buf(),
        state.log_path().to_path_buf(),
    ];
    // Outputs of an earlier run today are restored after the failed run's
    // outputs are deleted
    files.extend(store.dated_outputs(date));
    if let Some(previous) = store.latest_before(date).await? {
        files.push(store.snapshot_path(previous));
    }
    files.extend(
        config
            .paths
            .critical_files
            .iter()
            .map(|name| config.paths.resolve(name)),
    );
    files.sort();
    files.dedup();
    Ok(files)
}

fn summary_block(config: &Config, run: &RunSummary) {
    let mut items = vec![
        ("Source", config.source.name.clone()),
        ("Queued", run.pool.total.to_string()),
        ("Skipped", run.pool.skipped.to_string()),
        ("Fetched", run.pool.fetched.to_string()),
        ("Succeeded", run.pool.succeeded.to_string()),
        ("Failed", run.pool.failed.to_string()),
    ];
    if run.pool.lost_appends > 0 {
        items.push(("Lost appends", run.pool.lost_appends.to_string()));
    }
    if let Some(path) = &run.snapshot_path {
        items.push(("Snapshot", path.display().to_string()));
    }
    match &run.report_path {
        Some(path) => items.push((
            "Report",
            format!("{} ({} changed)", path.display(), run.changed_records),
        )),
        None => items.push(("Report", "none".to_string())),
    }
    summary("Run complete", &items);
}
