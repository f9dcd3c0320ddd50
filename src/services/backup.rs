//! The backup pipeline: dump → compress → upload → retain-local →
//! retain-remote → persist-state.
//!
//! Dump and compression failures are fatal to the run and recorded as
//! `last_failure`. Upload and retention failures are logged and tolerated;
//! a local-only backup still counts as a success. The scratch directory is
//! a `TempDir`, so it is removed on every exit path, and the archive is
//! staged inside it and renamed into the keep directory only once complete,
//! so retention never sees a partial file.

use crate::archive;
use crate::config::AppConfig;
use crate::error::BackupError;
use crate::mongo::MongoTools;
use crate::remote::RemoteStore;
use crate::state::{BackupState, StateStore};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackupMode {
    Manual,
    Auto,
    Cron,
}

impl std::fmt::Display for BackupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupMode::Manual => write!(f, "manual"),
            BackupMode::Auto => write!(f, "auto"),
            BackupMode::Cron => write!(f, "cron"),
        }
    }
}

#[derive(Debug)]
pub struct BackupOutcome {
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    pub s3_target: Option<String>,
}

/// Run one backup. The mode is informational only and affects nothing but
/// log lines. Every invocation produces a new, distinctly-named archive.
pub async fn run_backup(cfg: &AppConfig, mode: BackupMode) -> Result<BackupOutcome, BackupError> {
    let store = StateStore::new(cfg.state_file.clone());
    let started = Utc::now();
    tracing::info!(mode = %mode, "Starting backup run");

    match execute(cfg, started).await {
        Ok(outcome) => {
            let mut state = store.load();
            mark_success(&mut state, started, &outcome);
            if let Err(e) = store.save(&state) {
                tracing::warn!(error = %e, "Backup succeeded but state could not be persisted");
            }
            tracing::info!(
                archive = %outcome.archive_path.display(),
                size_bytes = outcome.size_bytes,
                total_backups = state.total_backups,
                "Backup run complete"
            );
            Ok(outcome)
        }
        Err(e) => {
            tracing::error!(mode = %mode, error = %e, "Backup run failed");
            let mut state = store.load();
            mark_failure(&mut state, &e.to_string());
            if let Err(se) = store.save(&state) {
                tracing::warn!(error = %se, "Could not persist failure state");
            }
            Err(e)
        }
    }
}

async fn execute(cfg: &AppConfig, started: DateTime<Utc>) -> Result<BackupOutcome, BackupError> {
    tokio::fs::create_dir_all(&cfg.backup_dir).await?;

    let mongo = MongoTools::new(cfg.clone());
    if !mongo.ping().await {
        return Err(BackupError::Unreachable(format!(
            "{}:{} did not answer the liveness probe",
            cfg.mongo_host, cfg.mongo_port
        )));
    }

    // Scratch lives inside the keep directory so the final rename stays on
    // one filesystem; the TempDir guard removes it on every exit path.
    let scratch = tempfile::Builder::new()
        .prefix(".scratch-")
        .tempdir_in(&cfg.backup_dir)?;

    let dump_dir = scratch.path().join("dump");
    mongo
        .dump(&dump_dir)
        .await
        .map_err(|e| BackupError::Dump(e.to_string()))?;

    let name = archive::archive_name(&cfg.deployment_id, started);
    let staged = scratch.path().join(&name);
    let size_bytes = {
        let dump_dir = dump_dir.clone();
        let staged = staged.clone();
        tokio::task::spawn_blocking(move || archive::pack(&dump_dir, &staged))
            .await
            .map_err(|e| BackupError::Compress(e.to_string()))?
            .map_err(|e| BackupError::Compress(e.to_string()))?
    };

    let archive_path = cfg.backup_dir.join(&name);
    tokio::fs::rename(&staged, &archive_path).await?;
    tracing::info!(archive = %archive_path.display(), size_bytes, "Archive created");

    let remote = RemoteStore::from_config(cfg).await;

    let s3_target = match &remote {
        Some(remote) => match remote.upload(&archive_path, &name).await {
            Ok(target) => {
                tracing::info!(target = %target, "Archive uploaded");
                Some(target)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Upload failed, keeping local archive");
                None
            }
        },
        None => {
            tracing::debug!("No bucket configured, skipping upload");
            None
        }
    };

    if let Err(e) = retain_local(cfg).await {
        tracing::warn!(error = %e, "Local retention pass failed");
    }
    if let Some(remote) = &remote {
        if let Err(e) = retain_remote(remote, cfg).await {
            tracing::warn!(error = %e, "Remote retention pass failed");
        }
    }

    Ok(BackupOutcome {
        archive_path,
        size_bytes,
        s3_target,
    })
}

/// Keep only the `keep` most recent local archives.
pub async fn retain_local(cfg: &AppConfig) -> anyhow::Result<usize> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(&cfg.backup_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }

    let victims = archive::retention_victims(&names, &cfg.deployment_id, cfg.keep);
    let mut removed = 0;
    for name in &victims {
        let path = cfg.backup_dir.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(archive = %name, "Removed archive outside keep-window");
                removed += 1;
            }
            Err(e) => tracing::warn!(archive = %name, error = %e, "Could not remove old archive"),
        }
    }
    Ok(removed)
}

/// Keep only the `keep` most recent remote archives, independent of the
/// local count.
pub async fn retain_remote(remote: &RemoteStore, cfg: &AppConfig) -> anyhow::Result<usize> {
    let names = remote.list_archive_names().await?;
    let victims = archive::retention_victims(&names, &cfg.deployment_id, cfg.keep);
    let mut removed = 0;
    for name in &victims {
        match remote.delete(name).await {
            Ok(()) => {
                tracing::info!(archive = %name, "Removed remote archive outside keep-window");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(archive = %name, error = %e, "Could not remove remote archive")
            }
        }
    }
    Ok(removed)
}

fn mark_success(state: &mut BackupState, started: DateTime<Utc>, outcome: &BackupOutcome) {
    state.last_success = Some(started);
    state.total_backups += 1;
    state.last_archive_path = Some(outcome.archive_path.display().to_string());
    state.last_s3_target = outcome.s3_target.clone();
    state.last_size_bytes = outcome.size_bytes;
}

fn mark_failure(state: &mut BackupState, message: &str) {
    state.last_failure = Some(message.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn outcome() -> BackupOutcome {
        BackupOutcome {
            archive_path: PathBuf::from("/var/backups/mongo/mongo-20260314_030005.tar.gz"),
            size_bytes: 2048,
            s3_target: Some("s3://bucket/mongo-backups/mongo-20260314_030005.tar.gz".into()),
        }
    }

    #[test]
    fn test_success_increments_total_and_sets_timestamp() {
        let started = Utc.with_ymd_and_hms(2026, 3, 14, 3, 0, 5).unwrap();
        let mut state = BackupState {
            total_backups: 7,
            last_failure: Some("older failure".into()),
            ..Default::default()
        };

        mark_success(&mut state, started, &outcome());

        assert_eq!(state.total_backups, 8);
        assert_eq!(state.last_success, Some(started));
        assert_eq!(state.last_size_bytes, 2048);
        assert!(state.last_archive_path.is_some());
        // Success records provenance but clears nothing else.
        assert_eq!(state.last_failure.as_deref(), Some("older failure"));
    }

    #[test]
    fn test_failure_leaves_success_history_untouched() {
        let previous = Utc.with_ymd_and_hms(2026, 3, 13, 3, 0, 0).unwrap();
        let mut state = BackupState {
            total_backups: 3,
            last_success: Some(previous),
            ..Default::default()
        };

        mark_failure(&mut state, "mongodump exited with 1");

        assert_eq!(state.total_backups, 3);
        assert_eq!(state.last_success, Some(previous));
        assert_eq!(state.last_failure.as_deref(), Some("mongodump exited with 1"));
    }

    #[test]
    fn test_success_without_upload_records_no_remote_target() {
        let mut state = BackupState::default();
        let local_only = BackupOutcome {
            s3_target: None,
            ..outcome()
        };
        mark_success(
            &mut state,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            &local_only,
        );
        assert!(state.last_s3_target.is_none());
    }

    #[tokio::test]
    async fn test_retain_local_deletes_only_oldest() {
        let dir = TempDir::new().unwrap();
        for name in [
            "mongo-20260101_000000.tar.gz",
            "mongo-20260102_000000.tar.gz",
            "mongo-20260103_000000.tar.gz",
            "unrelated.txt",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let mut cfg = AppConfig::from_env();
        cfg.backup_dir = dir.path().to_path_buf();
        cfg.deployment_id = "mongo".into();
        cfg.keep = 2;

        let removed = retain_local(&cfg).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("mongo-20260101_000000.tar.gz").exists());
        assert!(dir.path().join("mongo-20260102_000000.tar.gz").exists());
        assert!(dir.path().join("mongo-20260103_000000.tar.gz").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_retain_local_noop_when_under_keep() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("mongo-20260101_000000.tar.gz"), b"x").unwrap();

        let mut cfg = AppConfig::from_env();
        cfg.backup_dir = dir.path().to_path_buf();
        cfg.deployment_id = "mongo".into();
        cfg.keep = 5;

        assert_eq!(retain_local(&cfg).await.unwrap(), 0);
        assert!(dir.path().join("mongo-20260101_000000.tar.gz").exists());
    }
}
