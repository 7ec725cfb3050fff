//! Append log and ProcessedSet persistence.
//!
//! Every shared mutable file of a run is owned here. Workers only see
//! [`StateStore::append_outcome`] and [`StateStore::mark_processed`]; the
//! locks behind them never leave this type.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::{ensure_parent, read_bytes, remove_if_exists, write_json};
use crate::error::{AppError, Result};
use crate::models::{FetchOutcome, PathsConfig, Snapshot};

/// Resumable run state: append-only outcome log plus the ProcessedSet.
#[derive(Debug)]
pub struct StateStore {
    log_path: PathBuf,
    processed_path: PathBuf,
    log_lock: Mutex<()>,
    /// Lazily loaded copy of the processed-set file
    processed: Mutex<Option<BTreeSet<String>>>,
}

/// Counters from one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactStats {
    /// Log lines parsed into outcomes
    pub lines: usize,
    /// Unparseable lines skipped
    pub skipped: usize,
}

impl StateStore {
    pub fn new(log_path: impl Into<PathBuf>, processed_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            processed_path: processed_path.into(),
            log_lock: Mutex::new(()),
            processed: Mutex::new(None),
        }
    }

    /// Build a store from the configured paths.
    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(paths.log_path(), paths.processed_path())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn processed_path(&self) -> &Path {
        &self.processed_path
    }

    /// Whether a log from this or an earlier run is waiting to be compacted.
    pub fn has_pending_log(&self) -> bool {
        self.log_path.exists()
    }

    /// Append one outcome as one line of the log.
    ///
    /// The whole line is written and flushed under the log lock, so
    /// concurrent callers never interleave partial lines.
    pub async fn append_outcome(&self, outcome: &FetchOutcome) -> Result<()> {
        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');

        let _guard = self.log_lock.lock().await;
        ensure_parent(&self.log_path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read the ProcessedSet from disk.
    ///
    /// A missing or empty file yields an empty set.
    pub async fn load_processed(&self) -> Result<BTreeSet<String>> {
        let mut cache = self.processed.lock().await;
        let set = self.read_processed_file().await?;
        *cache = Some(set.clone());
        Ok(set)
    }

    /// Add `id` to the ProcessedSet and persist the whole set immediately.
    pub async fn mark_processed(&self, id: &str) -> Result<()> {
        let mut cache = self.processed.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_processed_file().await?);
        }
        let Some(set) = cache.as_mut() else {
            return Ok(());
        };
        if set.insert(id.to_string()) {
            write_json(&self.processed_path, set).await?;
        }
        Ok(())
    }

    /// Remove ids from the ProcessedSet so the next run fetches them again.
    ///
    /// Returns how many ids were actually removed.
    pub async fn clear_processed<I, S>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cache = self.processed.lock().await;
        let mut set = match cache.take() {
            Some(set) => set,
            None => self.read_processed_file().await?,
        };

        let before = set.len();
        for id in ids {
            set.remove(id.as_ref());
        }
        let removed = before - set.len();
        if removed > 0 {
            write_json(&self.processed_path, &set).await?;
        }
        *cache = Some(set);
        Ok(removed)
    }

    async fn read_processed_file(&self) -> Result<BTreeSet<String>> {
        let Some(bytes) = read_bytes(&self.processed_path).await? else {
            return Ok(BTreeSet::new());
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeSet::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| AppError::corrupt(&self.processed_path, e))
    }

    /// Stream the log into a deduplicated snapshot.
    ///
    /// Outcomes are applied with [`Snapshot::absorb`], so the result does not
    /// depend on the order workers happened to append in. Unparseable lines
    /// (e.g. a torn final line after a crash) are skipped with a warning.
    /// The log itself is left untouched; see [`StateStore::remove_log`].
    pub async fn compact(&self, date: NaiveDate) -> Result<(Snapshot, CompactStats)> {
        let mut snapshot = Snapshot::new(date);
        let mut stats = CompactStats::default();

        let _guard = self.log_lock.lock().await;
        let file = match tokio::fs::File::open(&self.log_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((snapshot, stats)),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FetchOutcome>(&line) {
                Ok(outcome) => {
                    snapshot.absorb(outcome);
                    stats.lines += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Skipping corrupt line {} in {}: {}",
                        line_no,
                        self.log_path.display(),
                        e
                    );
                    stats.skipped += 1;
                }
            }
        }

        Ok((snapshot, stats))
    }

    /// Delete the log. Call only after the compacted snapshot is on disk.
    pub async fn remove_log(&self) -> Result<bool> {
        let _guard = self.log_lock.lock().await;
        remove_if_exists(&self.log_path).await
    }
}
