//! End-to-end runs over a temporary data directory with a scripted fetcher.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};
use tempfile::TempDir;

use planwatch::error::{AppError, FetchError};
use planwatch::models::{Anchor, Change, Config, Record, SubItem};
use planwatch::pipeline::{RunOptions, run_pipeline};
use planwatch::services::{RecordFetcher, RetryPolicy, RotationToken};
use planwatch::storage::{SnapshotStore, StateStore};

/// Serves whatever the test put in its table; unknown ids are permanent
/// failures.
#[derive(Default)]
struct TableFetcher {
    table: Mutex<HashMap<String, Result<Record, FetchError>>>,
    calls: Mutex<Vec<String>>,
}

impl TableFetcher {
    fn set(&self, record: Record) {
        let id = record.id().to_string();
        self.table.lock().unwrap().insert(id, Ok(record));
    }

    fn fail(&self, id: &str) {
        self.table
            .lock()
            .unwrap()
            .insert(id.to_string(), Err(FetchError::permanent("404")));
    }

    fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl RecordFetcher for TableFetcher {
    async fn fetch(&self, id: &str, _token: &RotationToken) -> Result<Record, FetchError> {
        self.calls.lock().unwrap().push(id.to_string());
        self.table
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::permanent("unknown id")))
    }
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|id| id.to_string()).collect()
}

fn item(value: Value) -> SubItem {
    serde_json::from_value(value).unwrap()
}

fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.source.name = "permits".into();
    config.paths.data_dir = dir.to_path_buf();
    config.pool.workers = 3;
    config
}

fn options(date: NaiveDate) -> RunOptions {
    RunOptions::new(date).with_policy(RetryPolicy {
        max_attempts: 2,
        transient_backoff: Duration::ZERO,
        max_block_retries: 1,
        block_cooldown: Duration::ZERO,
        attempt_timeout: Duration::from_secs(5),
    })
}

fn permit(id: &str, status: &str, events: &[&str], meetings: &[&str]) -> Record {
    let history = events
        .iter()
        .map(|e| item(json!({"event_description": e, "event_date": "2026-03-01"})))
        .collect();
    let meetings = meetings
        .iter()
        .map(|m| item(json!({"meeting_id": m})))
        .collect();
    Record::new(id)
        .unwrap()
        .with_field("status", status)
        .with_list("history", history)
        .with_list("meeting_history", meetings)
}

#[tokio::test]
async fn resume_skips_processed_ids() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let fetcher = Arc::new(TableFetcher::default());
    for id in ["1", "2", "3", "4", "5", "6"] {
        fetcher.set(permit(id, "open", &[], &[]));
    }

    let state = StateStore::from_paths(&config.paths);
    state.mark_processed("1").await.unwrap();
    state.mark_processed("2").await.unwrap();

    let queue = ids(&["1", "2", "3", "4", "5", "6"]);
    let run = run_pipeline(&config, fetcher.clone(), &queue, options(day(1)))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(), ids(&["3", "4", "5", "6"]));
    assert_eq!(run.pool.fetched + run.pool.skipped, run.pool.total);
    assert_eq!(run.pool.skipped, 2);

    let store = SnapshotStore::from_paths(&config.paths).unwrap();
    let snapshot = store.load_snapshot(day(1)).await.unwrap().unwrap();
    assert_eq!(snapshot.len(), 4);
    assert!(!snapshot.contains("1"));

    assert!(!config.paths.log_path().exists());
    assert!(!config.paths.backup_path().exists());
    assert_eq!(StateStore::from_paths(&config.paths).load_processed().await.unwrap().len(), 6);
}

#[tokio::test]
async fn second_day_reports_changes() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let store = SnapshotStore::from_paths(&config.paths).unwrap();
    let fetcher = Arc::new(TableFetcher::default());
    let queue = ids(&["1", "2", "3", "4"]);

    fetcher.set(permit("1", "open", &["filed"], &["m1"]));
    fetcher.set(permit("2", "open", &["filed"], &[]));
    fetcher.fail("3");
    fetcher.fail("4");

    let first = run_pipeline(&config, fetcher.clone(), &queue, options(day(1)))
        .await
        .unwrap();
    assert_eq!(first.pool.succeeded, 2);
    assert_eq!(first.pool.failed, 2);
    assert!(first.previous_date.is_none());
    assert!(first.report_path.is_none());

    // Next day's queue: everything is eligible again
    StateStore::from_paths(&config.paths)
        .clear_processed(&queue)
        .await
        .unwrap();
    fetcher.set(permit("1", "approved", &["hearing", "filed"], &["m1", "m2"]));
    fetcher.set(permit("4", "open", &[], &[]));

    let second = run_pipeline(&config, fetcher.clone(), &queue, options(day(2)))
        .await
        .unwrap();
    assert_eq!(second.previous_date, Some(day(1)));
    assert_eq!(second.changed_records, 2);
    assert!(second.report_path.is_some());

    let report = store.load_report(day(2)).await.unwrap().unwrap();
    assert_eq!(report.old_date, day(1));
    assert!(report.get("2").is_none());
    assert!(report.get("3").is_none());
    assert_eq!(report.get("4"), Some(&[Change::NewRecord][..]));

    let changes = report.get("1").unwrap();
    assert_eq!(changes.len(), 3);
    assert!(changes.iter().any(|c| matches!(
        c,
        Change::Field { field, new, .. } if field == "status" && new == "approved"
    )));
    assert!(changes.iter().any(|c| matches!(
        c,
        Change::History { new_events, anchor: Anchor::Matched, .. } if new_events.len() == 1
    )));
    assert!(changes.iter().any(|c| matches!(
        c,
        Change::Keyed { added, .. } if added.len() == 1
    )));
}

#[tokio::test]
async fn failure_never_replaces_a_known_record() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let store = SnapshotStore::from_paths(&config.paths).unwrap();
    let fetcher = Arc::new(TableFetcher::default());
    let queue = ids(&["7", "8"]);

    fetcher.set(permit("7", "open", &[], &[]));
    fetcher.set(permit("8", "open", &[], &[]));
    run_pipeline(&config, fetcher.clone(), &queue, options(day(1)))
        .await
        .unwrap();

    StateStore::from_paths(&config.paths)
        .clear_processed(&queue)
        .await
        .unwrap();
    fetcher.fail("7");

    let run = run_pipeline(&config, fetcher.clone(), &queue, options(day(2)))
        .await
        .unwrap();
    assert_eq!(run.pool.failed, 1);
    assert!(run.report_path.is_none());

    let snapshot = store.load_snapshot(day(2)).await.unwrap().unwrap();
    assert_eq!(snapshot.record("7").unwrap().field("status"), Some(&json!("open")));
    assert!(snapshot.failed_ids().is_empty());
}

#[tokio::test]
async fn nothing_to_do_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let fetcher = Arc::new(TableFetcher::default());

    let state = StateStore::from_paths(&config.paths);
    state.mark_processed("1").await.unwrap();

    let run = run_pipeline(&config, fetcher.clone(), &ids(&["1"]), options(day(1)))
        .await
        .unwrap();

    assert!(fetcher.calls().is_empty());
    assert!(run.compaction.is_none());
    assert!(run.snapshot_path.is_none());
    let store = SnapshotStore::from_paths(&config.paths).unwrap();
    assert!(store.list_dates().await.unwrap().is_empty());
}

#[tokio::test]
async fn tripped_breaker_rolls_back() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    let store = SnapshotStore::from_paths(&config.paths).unwrap();
    let fetcher = Arc::new(TableFetcher::default());

    fetcher.set(permit("1", "open", &[], &[]));
    run_pipeline(&config, fetcher.clone(), &ids(&["1"]), options(day(1)))
        .await
        .unwrap();

    let processed_before = std::fs::read(config.paths.processed_path()).unwrap();
    let snapshot_before = std::fs::read(store.snapshot_path(day(1))).unwrap();

    config.breaker.min_attempts = 2;
    config.breaker.max_failure_percent = 50;
    let err = run_pipeline(
        &config,
        fetcher.clone(),
        &ids(&["1", "2", "3", "4"]),
        options(day(2)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::BreakerTripped { failed: 3, .. }));
    assert_eq!(std::fs::read(config.paths.processed_path()).unwrap(), processed_before);
    assert_eq!(std::fs::read(store.snapshot_path(day(1))).unwrap(), snapshot_before);
    assert!(!config.paths.log_path().exists());
    assert!(!store.snapshot_path(day(2)).exists());
    assert!(!config.paths.backup_path().exists());
}

#[tokio::test]
async fn failed_report_write_rolls_back_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let store = SnapshotStore::from_paths(&config.paths).unwrap();
    let fetcher = Arc::new(TableFetcher::default());
    let queue = ids(&["1"]);

    fetcher.set(permit("1", "open", &[], &[]));
    run_pipeline(&config, fetcher.clone(), &queue, options(day(1)))
        .await
        .unwrap();

    let state = StateStore::from_paths(&config.paths);
    state.clear_processed(&queue).await.unwrap();
    let processed_before = std::fs::read(config.paths.processed_path()).unwrap();
    let snapshot_before = std::fs::read(store.snapshot_path(day(1))).unwrap();

    // The report's temp file cannot be created over a directory
    let mut blocker = store.report_path(day(2)).into_os_string();
    blocker.push(".tmp");
    std::fs::create_dir_all(&blocker).unwrap();

    fetcher.set(permit("1", "closed", &[], &[]));
    let err = run_pipeline(&config, fetcher.clone(), &queue, options(day(2)))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Stage { ref stage, .. } if stage == "diff"));
    assert_eq!(std::fs::read(config.paths.processed_path()).unwrap(), processed_before);
    assert_eq!(std::fs::read(store.snapshot_path(day(1))).unwrap(), snapshot_before);
    assert!(!store.snapshot_path(day(2)).exists());
    assert!(!store.report_path(day(2)).exists());
    assert!(!config.paths.log_path().exists());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_any_work() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.fetcher.timeout_secs = 0;
    let fetcher = Arc::new(TableFetcher::default());
    fetcher.set(permit("1", "open", &[], &[]));

    let err = run_pipeline(&config, fetcher.clone(), &ids(&["1"]), options(day(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert!(fetcher.calls().is_empty());
    assert!(!config.paths.backup_path().exists());
    assert!(!config.paths.processed_path().exists());
}
