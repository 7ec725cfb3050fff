//! All-or-nothing wrapper around a pipeline run.
//!
//! A compensating transaction over plain files: critical files are copied
//! aside before the run, restored verbatim if any stage fails, and the
//! run's dated outputs are deleted. Concurrent runs over the same data
//! directory are not supported.

use std::future::Future;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::storage::{ensure_parent, remove_if_exists};

/// An open backup of the critical files.
#[derive(Debug)]
pub struct Supervisor {
    backup_dir: PathBuf,
    /// (original, backup copy)
    backed_up: Vec<(PathBuf, PathBuf)>,
    /// Critical files that did not exist when the run began
    absent: Vec<PathBuf>,
    /// Files the run may create, removed on rollback
    dated_outputs: Vec<PathBuf>,
}

impl Supervisor {
    /// Copy every critical file into `backup_dir`.
    ///
    /// Missing critical files are logged and remembered, not fatal: a
    /// rollback removes them again if the failed run created them.
    ///
    /// An existing backup area is left by an interrupted run or an
    /// incomplete rollback and may hold the only good copy of the state,
    /// so it is never overwritten: `begin` fails until it is restored or
    /// removed by hand.
    pub async fn begin(
        backup_dir: impl Into<PathBuf>,
        critical_files: &[PathBuf],
        dated_outputs: Vec<PathBuf>,
    ) -> Result<Self> {
        let backup_dir = backup_dir.into();
        if tokio::fs::try_exists(&backup_dir).await? {
            log::error!(
                "Backup from an earlier run still present at {}",
                backup_dir.display()
            );
            return Err(AppError::corrupt(
                &backup_dir,
                "backup from an earlier run was never committed; restore or remove it before running again",
            ));
        }
        tokio::fs::create_dir_all(&backup_dir).await?;

        let mut backed_up = Vec::new();
        let mut absent = Vec::new();
        for (index, original) in critical_files.iter().enumerate() {
            if !tokio::fs::try_exists(original).await? {
                log::warn!("File not found for backup: {}", original.display());
                absent.push(original.clone());
                continue;
            }
            let copy = backup_dir.join(backup_name(index, original));
            tokio::fs::copy(original, &copy).await?;
            log::debug!("Backed up: {}", original.display());
            backed_up.push((original.clone(), copy));
        }

        log::info!(
            "Backup created: {} files saved, {} not present",
            backed_up.len(),
            absent.len()
        );
        Ok(Self {
            backup_dir,
            backed_up,
            absent,
            dated_outputs,
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Run `work`; commit on success, roll back and re-raise on failure.
    pub async fn supervise<T, F>(self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match work.await {
            Ok(value) => {
                // The outputs are already in place; a leftover backup only
                // blocks the next run
                if let Err(e) = self.commit().await {
                    log::warn!("Run committed but the backup could not be removed: {}", e);
                }
                Ok(value)
            }
            Err(error) => {
                log::error!("Error detected: {}", error);
                if let Err(rollback_error) = self.rollback().await {
                    log::error!("Rollback incomplete: {}", rollback_error);
                }
                Err(error)
            }
        }
    }

    /// Discard the backup area.
    pub async fn commit(self) -> Result<()> {
        tokio::fs::remove_dir_all(&self.backup_dir).await?;
        log::info!("Pipeline successful. Backup removed.");
        Ok(())
    }

    /// Restore the pre-run state.
    ///
    /// Every step is attempted even if an earlier one fails; the first
    /// error is returned and the backup area is then kept for manual
    /// recovery.
    pub async fn rollback(self) -> Result<()> {
        log::warn!("Restoring state from backup...");
        let mut first_error = None;

        for path in &self.dated_outputs {
            match remove_if_exists(path).await {
                Ok(true) => log::info!("Deleted output of failed run: {}", path.display()),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Could not delete {}: {}", path.display(), e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        for (original, copy) in &self.backed_up {
            match restore(copy, original).await {
                Ok(()) => log::info!("Restored: {}", original.display()),
                Err(e) => {
                    log::error!("Could not restore {}: {}", original.display(), e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        for path in &self.absent {
            match remove_if_exists(path).await {
                Ok(true) => log::info!("Removed file created by failed run: {}", path.display()),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Could not delete {}: {}", path.display(), e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(error) = first_error {
            log::error!("Backup kept at {}", self.backup_dir.display());
            return Err(error);
        }
        tokio::fs::remove_dir_all(&self.backup_dir).await?;
        Ok(())
    }
}

fn backup_name(index: usize, original: &Path) -> String {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    format!("{index:02}_{name}")
}

/// Copy the backup next to the original, then rename over it.
async fn restore(copy: &Path, original: &Path) -> Result<()> {
    ensure_parent(original).await?;
    let mut staging = original.as_os_str().to_owned();
    staging.push(".restore");
    let staging = PathBuf::from(staging);
    tokio::fs::copy(copy, &staging).await?;
    tokio::fs::rename(&staging, original).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        critical: Vec<PathBuf>,
        output: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let critical = vec![
            dir.path().join("processed.json"),
            dir.path().join("snapshot_2026_01_01.json"),
            dir.path().join("log.jsonl"),
        ];
        std::fs::write(&critical[0], r#"["1","2"]"#).unwrap();
        std::fs::write(&critical[1], r#"{"records":{}}"#).unwrap();
        let output = dir.path().join("snapshot_2026_01_02.json");
        Fixture {
            dir,
            critical,
            output,
        }
    }

    async fn begin(f: &Fixture) -> Supervisor {
        Supervisor::begin(
            f.dir.path().join(".backup"),
            &f.critical,
            vec![f.output.clone()],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_rollback_restores_and_cleans() {
        let f = fixture();
        let supervisor = begin(&f).await;

        std::fs::write(&f.critical[0], r#"["1","2","3"]"#).unwrap();
        std::fs::write(&f.critical[2], "{}\n").unwrap();
        std::fs::write(&f.output, "partial").unwrap();

        let result: Result<()> = supervisor
            .supervise(async { Err(AppError::stage("compact", "disk full")) })
            .await;

        assert!(matches!(result, Err(AppError::Stage { .. })));
        assert_eq!(std::fs::read_to_string(&f.critical[0]).unwrap(), r#"["1","2"]"#);
        assert_eq!(
            std::fs::read_to_string(&f.critical[1]).unwrap(),
            r#"{"records":{}}"#
        );
        assert!(!f.critical[2].exists());
        assert!(!f.output.exists());
        assert!(!f.dir.path().join(".backup").exists());
    }

    #[tokio::test]
    async fn test_commit_keeps_new_state() {
        let f = fixture();
        let supervisor = begin(&f).await;
        assert!(supervisor.backup_dir().exists());

        let value = supervisor
            .supervise(async {
                std::fs::write(&f.output, "done").unwrap();
                Ok(7)
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(f.output.exists());
        assert!(!f.dir.path().join(".backup").exists());
    }

    #[tokio::test]
    async fn test_leftover_backup_is_never_overwritten() {
        let f = fixture();
        let first = begin(&f).await;
        let saved = first.backed_up[0].1.clone();

        // Rollback failed earlier: the live file is bad, the backup is good
        std::fs::write(&f.critical[0], "BAD").unwrap();
        drop(first);

        let err = Supervisor::begin(
            f.dir.path().join(".backup"),
            &f.critical,
            vec![f.output.clone()],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::CorruptState { .. }));
        assert_eq!(std::fs::read_to_string(&saved).unwrap(), r#"["1","2"]"#);
    }

    #[tokio::test]
    async fn test_commit_cleanup_failure_keeps_result() {
        let f = fixture();
        let supervisor = begin(&f).await;
        let backup_dir = supervisor.backup_dir().to_path_buf();

        let value = supervisor
            .supervise(async {
                std::fs::remove_dir_all(&backup_dir).unwrap();
                Ok("committed")
            })
            .await
            .unwrap();

        assert_eq!(value, "committed");
    }
}
