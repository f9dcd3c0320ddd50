//! Durable record of backup history.
//!
//! A single JSON file is the sole source of truth for the last backup
//! outcome and the cumulative run count. The Backup Executor is the only
//! writer; the Health Monitor and metrics endpoint only read. Writes go
//! through a temp file and an atomic rename so readers observe either the
//! old record or the new one, never a truncated mix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Compact timestamp used both in the state file and in archive names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupState {
    /// Set only by a successful backup run.
    #[serde(default, with = "compact_ts")]
    pub last_success: Option<DateTime<Utc>>,

    /// Set on any failed run; a later success does not clear it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,

    /// Incremented exactly once per successful run.
    #[serde(default)]
    pub total_backups: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_archive_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_s3_target: Option<String>,

    #[serde(default)]
    pub last_size_bytes: u64,
}

pub(crate) mod compact_ts {
    use super::TIMESTAMP_FORMAT;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => ser.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        Ok(raw.and_then(|s| {
            NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT)
                .ok()
                .map(|n| n.and_utc())
        }))
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state. A missing or corrupt file is "no history",
    /// never an error that blocks execution.
    pub fn load(&self) -> BackupState {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "State file unreadable, treating as empty history"
                    );
                    BackupState::default()
                }
            },
            Err(_) => BackupState::default(),
        }
    }

    /// Atomically replace the state file (write-temp-then-rename).
    pub fn save(&self, state: &BackupState) -> anyhow::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
