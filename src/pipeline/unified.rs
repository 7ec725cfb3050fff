// src/pipeline/unified.rs

//! One combined daily document over several sources' change reports.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::storage::{dated_path, read_json, write_json};

const UNIFIED_PREFIX: &str = "unified_daily_report";

/// Where one source keeps its daily reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSource {
    pub name: String,
    pub data_dir: PathBuf,
    pub report_prefix: String,
}

impl ReportSource {
    pub fn report_path(&self, date: NaiveDate) -> PathBuf {
        dated_path(&self.data_dir, &self.report_prefix, date)
    }
}

/// Parses `NAME=DATA_DIR:REPORT_PREFIX`.
impl FromStr for ReportSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AppError::config(format!("expected NAME=DATA_DIR:REPORT_PREFIX, got '{s}'"));
        let (name, rest) = s.split_once('=').ok_or_else(invalid)?;
        let (dir, prefix) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if name.trim().is_empty() || dir.trim().is_empty() || prefix.trim().is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            name: name.trim().to_string(),
            data_dir: PathBuf::from(dir.trim()),
            report_prefix: prefix.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed/missing")]
    FailedOrMissing,
}

/// `{date, generated_at, status, data}` keyed by source name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedReport {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub status: BTreeMap<String, SourceStatus>,
    pub data: BTreeMap<String, Option<Value>>,
}

/// Collect each source's report for `date`.
///
/// Missing or unreadable reports mark the source `failed/missing`; they
/// never fail the whole document.
pub async fn build_unified_report(date: NaiveDate, sources: &[ReportSource]) -> UnifiedReport {
    let mut status = BTreeMap::new();
    let mut data = BTreeMap::new();

    for source in sources {
        let path = source.report_path(date);
        let report = match read_json::<Value>(&path).await {
            Ok(report) => report,
            Err(e) => {
                log::warn!("Unreadable report for {}: {}", source.name, e);
                None
            }
        };
        let state = match &report {
            Some(_) => SourceStatus::Success,
            None => {
                log::warn!("No report for {} at {}", source.name, path.display());
                SourceStatus::FailedOrMissing
            }
        };
        status.insert(source.name.clone(), state);
        data.insert(source.name.clone(), report);
    }

    UnifiedReport {
        date,
        generated_at: Utc::now(),
        status,
        data,
    }
}

/// Write `unified_daily_report_{YYYY_MM_DD}.json` into `out_dir`.
pub async fn write_unified_report(out_dir: &Path, report: &UnifiedReport) -> Result<PathBuf> {
    let path = dated_path(out_dir, UNIFIED_PREFIX, report.date);
    write_json(&path, report).await?;
    log::info!("Unified report saved: {}", path.display());
    Ok(path)
}
