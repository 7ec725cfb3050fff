//! Dated snapshot and report files.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use regex::Regex;

use super::{read_json, remove_if_exists, write_json};
use crate::error::Result;
use crate::models::{ChangeReport, PathsConfig, Snapshot};

const DATE_FORMAT: &str = "%Y_%m_%d";

/// Dated file layout of one source's data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    data_dir: PathBuf,
    snapshot_prefix: String,
    report_prefix: String,
    snapshot_pattern: Regex,
}

impl SnapshotStore {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        snapshot_prefix: impl Into<String>,
        report_prefix: impl Into<String>,
    ) -> Result<Self> {
        let snapshot_prefix = snapshot_prefix.into();
        let snapshot_pattern = Regex::new(&format!(
            r"^{}_(\d{{4}}_\d{{2}}_\d{{2}})\.json$",
            regex::escape(&snapshot_prefix)
        ))?;
        Ok(Self {
            data_dir: data_dir.into(),
            snapshot_prefix,
            report_prefix: report_prefix.into(),
            snapshot_pattern,
        })
    }

    pub fn from_paths(paths: &PathsConfig) -> Result<Self> {
        Self::new(
            &paths.data_dir,
            &paths.snapshot_prefix,
            &paths.report_prefix,
        )
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `{data_dir}/{snapshot_prefix}_{YYYY_MM_DD}.json`
    pub fn snapshot_path(&self, date: NaiveDate) -> PathBuf {
        dated_path(&self.data_dir, &self.snapshot_prefix, date)
    }

    /// `{data_dir}/{report_prefix}_{YYYY_MM_DD}.json`
    pub fn report_path(&self, date: NaiveDate) -> PathBuf {
        dated_path(&self.data_dir, &self.report_prefix, date)
    }

    /// Files a run for `date` may create.
    pub fn dated_outputs(&self, date: NaiveDate) -> Vec<PathBuf> {
        vec![self.snapshot_path(date), self.report_path(date)]
    }

    /// Write a snapshot atomically under its own date.
    pub async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let path = self.snapshot_path(snapshot.date);
        write_json(&path, snapshot).await?;
        log::info!(
            "Saved snapshot {} ({} entries, {} records)",
            path.display(),
            snapshot.len(),
            snapshot.record_count()
        );
        Ok(path)
    }

    pub async fn load_snapshot(&self, date: NaiveDate) -> Result<Option<Snapshot>> {
        read_json(&self.snapshot_path(date)).await
    }

    /// Write a change report atomically under its new-snapshot date.
    pub async fn write_report(&self, report: &ChangeReport) -> Result<PathBuf> {
        let path = self.report_path(report.new_date);
        write_json(&path, report).await?;
        log::info!(
            "Saved report {} ({} changed records)",
            path.display(),
            report.change_count()
        );
        Ok(path)
    }

    pub async fn load_report(&self, date: NaiveDate) -> Result<Option<ChangeReport>> {
        read_json(&self.report_path(date)).await
    }

    /// Delete every dated output for `date`.
    pub async fn remove_dated_outputs(&self, date: NaiveDate) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for path in self.dated_outputs(date) {
            if remove_if_exists(&path).await? {
                removed.push(path);
            }
        }
        Ok(removed)
    }

    /// Dates of all snapshots on disk, oldest first.
    pub async fn list_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dates),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(date) = self.parse_snapshot_name(name) {
                dates.push(date);
            }
        }

        dates.sort();
        Ok(dates)
    }

    /// Most recent snapshot date strictly before `date`.
    pub async fn latest_before(&self, date: NaiveDate) -> Result<Option<NaiveDate>> {
        Ok(self.list_dates().await?.into_iter().rfind(|d| *d < date))
    }

    /// Most recent snapshot date on or before `date`.
    pub async fn latest_until(&self, date: NaiveDate) -> Result<Option<NaiveDate>> {
        Ok(self.list_dates().await?.into_iter().rfind(|d| *d <= date))
    }

    /// The two most recent snapshot dates as `(old, new)`.
    pub async fn latest_two(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let dates = self.list_dates().await?;
        Ok(match dates.as_slice() {
            [.., old, new] => Some((*old, *new)),
            _ => None,
        })
    }

    fn parse_snapshot_name(&self, name: &str) -> Option<NaiveDate> {
        let caps = self.snapshot_pattern.captures(name)?;
        NaiveDate::parse_from_str(caps.get(1)?.as_str(), DATE_FORMAT).ok()
    }
}

/// `{dir}/{prefix}_{YYYY_MM_DD}.json`
pub fn dated_path(dir: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}_{}.json", prefix, date.format(DATE_FORMAT)))
}
