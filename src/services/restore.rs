//! Restore bootstrapper, run once at process start.
//!
//! The decision rule is the idempotence guarantee: if the target database
//! has any collection other than the sentinel marker, nothing is touched.
//! Otherwise the fixed, ordered list of known collections is walked and
//! each one is restored in isolation — a missing artifact is a warning, a
//! failed collection is recorded and the walk continues.

use crate::archive;
use crate::config::AppConfig;
use crate::mongo::MongoTools;
use crate::remote::RemoteStore;
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome {
    Restored,
    SkippedMissing,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CollectionRestore {
    pub name: String,
    pub outcome: CollectionOutcome,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    /// True when the database already held real data and the restore was a no-op.
    pub skipped_nonempty: bool,
    /// Non-sentinel collections present at decision time.
    pub existing_collections: usize,
    pub outcomes: Vec<CollectionRestore>,
}

impl RestoreReport {
    pub fn restored(&self) -> usize {
        self.count(|o| matches!(o, CollectionOutcome::Restored))
    }

    pub fn skipped_missing(&self) -> usize {
        self.count(|o| matches!(o, CollectionOutcome::SkippedMissing))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, CollectionOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&CollectionOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|c| pred(&c.outcome)).count()
    }

    pub fn summary(&self) -> String {
        if self.skipped_nonempty {
            format!(
                "skipped: {} existing collection(s)",
                self.existing_collections
            )
        } else {
            format!(
                "{} restored, {} skipped-missing, {} failed",
                self.restored(),
                self.skipped_missing(),
                self.failed()
            )
        }
    }
}

/// Collections that count as real data when deciding whether to restore.
pub fn real_collection_count(inventory: &[String], sentinel: &str) -> usize {
    inventory.iter().filter(|c| c.as_str() != sentinel).count()
}

/// Where snapshot artifacts live and what shape they have.
#[derive(Debug, Clone)]
pub enum SnapshotLayout {
    /// Extracted `mongodump` output: `{root}/{db}/{collection}.bson`.
    BsonDump { root: PathBuf, db: String },
    /// Pre-staged per-collection JSON files: `{root}/{collection}.json`.
    SeedFiles { root: PathBuf },
}

impl SnapshotLayout {
    pub fn artifact_path(&self, collection: &str) -> PathBuf {
        match self {
            SnapshotLayout::BsonDump { root, db } => {
                root.join(db).join(format!("{collection}.bson"))
            }
            SnapshotLayout::SeedFiles { root } => root.join(format!("{collection}.json")),
        }
    }
}

#[async_trait]
pub trait CollectionRestorer {
    async fn restore(&self, collection: &str, artifact: &Path) -> anyhow::Result<()>;
}

struct BsonRestorer<'a>(&'a MongoTools);

#[async_trait]
impl CollectionRestorer for BsonRestorer<'_> {
    async fn restore(&self, collection: &str, artifact: &Path) -> anyhow::Result<()> {
        self.0.restore_collection(artifact, collection).await
    }
}

struct SeedRestorer<'a>(&'a MongoTools);

#[async_trait]
impl CollectionRestorer for SeedRestorer<'_> {
    async fn restore(&self, collection: &str, artifact: &Path) -> anyhow::Result<()> {
        self.0.import_collection(artifact, collection).await
    }
}

/// Walk the known collection list in order, isolating each failure.
pub(crate) async fn run_collection_pass<R: CollectionRestorer + Sync>(
    restorer: &R,
    layout: &SnapshotLayout,
    collections: &[String],
) -> Vec<CollectionRestore> {
    let mut outcomes = Vec::with_capacity(collections.len());
    for name in collections {
        let artifact = layout.artifact_path(name);
        let outcome = if !artifact.exists() {
            tracing::warn!(
                collection = %name,
                artifact = %artifact.display(),
                "No snapshot artifact, skipping collection"
            );
            CollectionOutcome::SkippedMissing
        } else {
            match restorer.restore(name, &artifact).await {
                Ok(()) => {
                    tracing::info!(collection = %name, "Collection restored");
                    CollectionOutcome::Restored
                }
                Err(e) => {
                    tracing::error!(collection = %name, error = %e, "Collection restore failed");
                    CollectionOutcome::Failed(e.to_string())
                }
            }
        };
        outcomes.push(CollectionRestore {
            name: name.clone(),
            outcome,
        });
    }
    outcomes
}

/// Populate an untouched database from a snapshot, or do nothing.
///
/// Only unreachable-database and inventory errors are fatal; individual
/// collection failures are reported, not raised.
pub async fn restore_if_empty(cfg: &AppConfig) -> anyhow::Result<RestoreReport> {
    let mongo = MongoTools::new(cfg.clone());
    mongo.wait_ready().await?;

    let inventory = mongo
        .list_collections()
        .await
        .context("listing collections to decide on restore")?;
    let existing = real_collection_count(&inventory, &cfg.sentinel_collection);
    if existing > 0 {
        tracing::info!(
            existing,
            "Database already contains data, restore skipped"
        );
        return Ok(RestoreReport {
            skipped_nonempty: true,
            existing_collections: existing,
            outcomes: Vec::new(),
        });
    }

    // The guard keeps a downloaded archive's extraction directory alive for
    // the duration of the pass.
    let (_guard, layout) = locate_snapshot(cfg).await;

    let outcomes = match &layout {
        Some(layout @ SnapshotLayout::BsonDump { .. }) => {
            run_collection_pass(&BsonRestorer(&mongo), layout, &cfg.restore_collections).await
        }
        Some(layout @ SnapshotLayout::SeedFiles { .. }) => {
            run_collection_pass(&SeedRestorer(&mongo), layout, &cfg.restore_collections).await
        }
        None => {
            tracing::warn!("No snapshot source available, nothing to restore");
            cfg.restore_collections
                .iter()
                .map(|name| CollectionRestore {
                    name: name.clone(),
                    outcome: CollectionOutcome::SkippedMissing,
                })
                .collect()
        }
    };

    let report = RestoreReport {
        skipped_nonempty: false,
        existing_collections: 0,
        outcomes,
    };

    // Advisory only: surface the final shape of the database for operators.
    match mongo.list_collections().await {
        Ok(after) => tracing::info!(
            collections = after.len(),
            summary = %report.summary(),
            "Restore pass finished"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not re-query collections after restore"),
    }

    Ok(report)
}

/// Find the snapshot to restore from: the latest object-storage archive when
/// a bucket is configured, otherwise the pre-staged seed directory.
async fn locate_snapshot(cfg: &AppConfig) -> (Option<TempDir>, Option<SnapshotLayout>) {
    if let Some(remote) = RemoteStore::from_config(cfg).await {
        match fetch_latest_archive(&remote, cfg).await {
            Ok(Some((guard, layout))) => return (Some(guard), Some(layout)),
            Ok(None) => tracing::info!("Bucket holds no archive for this deployment"),
            Err(e) => tracing::warn!(error = %e, "Could not fetch remote archive"),
        }
    }

    match &cfg.restore_seed_dir {
        Some(root) if root.is_dir() => (
            None,
            Some(SnapshotLayout::SeedFiles { root: root.clone() }),
        ),
        Some(root) => {
            tracing::warn!(dir = %root.display(), "Seed directory does not exist");
            (None, None)
        }
        None => (None, None),
    }
}

async fn fetch_latest_archive(
    remote: &RemoteStore,
    cfg: &AppConfig,
) -> anyhow::Result<Option<(TempDir, SnapshotLayout)>> {
    let Some(name) = remote.latest_archive(&cfg.deployment_id).await? else {
        return Ok(None);
    };

    let workdir = TempDir::new().context("creating restore scratch directory")?;
    let archive_path = workdir.path().join(&name);
    remote.download(&name, &archive_path).await?;
    tracing::info!(archive = %name, "Downloaded latest archive");

    let extract_dir = workdir.path().join("extract");
    {
        let archive_path = archive_path.clone();
        let extract_dir = extract_dir.clone();
        tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &extract_dir))
            .await
            .context("extraction task failed")??;
    }

    let layout = SnapshotLayout::BsonDump {
        root: extract_dir,
        db: cfg.mongo_db.clone(),
    };
    Ok(Some((workdir, layout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeRestorer {
        fail: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRestorer {
        fn new(fail: &[&str]) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CollectionRestorer for FakeRestorer {
        async fn restore(&self, collection: &str, _artifact: &Path) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(collection.to_string());
            if self.fail.contains(collection) {
                anyhow::bail!("simulated restore failure");
            }
            Ok(())
        }
    }

    fn collections(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sentinel_is_excluded_from_emptiness_check() {
        let inventory = collections(&["init_marker"]);
        assert_eq!(real_collection_count(&inventory, "init_marker"), 0);

        let inventory = collections(&["init_marker", "projects"]);
        assert_eq!(real_collection_count(&inventory, "init_marker"), 1);

        assert_eq!(real_collection_count(&[], "init_marker"), 0);
    }

    #[test]
    fn test_layout_artifact_paths() {
        let dump = SnapshotLayout::BsonDump {
            root: PathBuf::from("/tmp/extract"),
            db: "portfolio".into(),
        };
        assert_eq!(
            dump.artifact_path("projects"),
            PathBuf::from("/tmp/extract/portfolio/projects.bson")
        );

        let seed = SnapshotLayout::SeedFiles {
            root: PathBuf::from("/seed"),
        };
        assert_eq!(
            seed.artifact_path("skills"),
            PathBuf::from("/seed/skills.json")
        );
    }

    #[tokio::test]
    async fn test_partial_snapshot_set_restores_present_and_skips_missing() {
        let seed = tempfile::TempDir::new().unwrap();
        for name in ["projects", "skills", "messages"] {
            std::fs::write(seed.path().join(format!("{name}.json")), b"[]").unwrap();
        }

        let layout = SnapshotLayout::SeedFiles {
            root: seed.path().to_path_buf(),
        };
        let restorer = FakeRestorer::new(&[]);
        let all = collections(&["projects", "skills", "experiences", "messages", "profiles"]);

        let outcomes = run_collection_pass(&restorer, &layout, &all).await;
        let report = RestoreReport {
            skipped_nonempty: false,
            existing_collections: 0,
            outcomes,
        };

        assert_eq!(report.restored(), 3);
        assert_eq!(report.skipped_missing(), 2);
        assert_eq!(report.failed(), 0);
        // Missing collections never reach the restore tool.
        assert_eq!(
            *restorer.calls.lock().unwrap(),
            vec!["projects", "skills", "messages"]
        );
    }

    #[tokio::test]
    async fn test_one_failing_collection_does_not_abort_the_rest() {
        let seed = tempfile::TempDir::new().unwrap();
        for name in ["projects", "skills", "messages"] {
            std::fs::write(seed.path().join(format!("{name}.json")), b"[]").unwrap();
        }

        let layout = SnapshotLayout::SeedFiles {
            root: seed.path().to_path_buf(),
        };
        let restorer = FakeRestorer::new(&["skills"]);
        let all = collections(&["projects", "skills", "messages"]);

        let outcomes = run_collection_pass(&restorer, &layout, &all).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].outcome, CollectionOutcome::Restored);
        assert!(matches!(outcomes[1].outcome, CollectionOutcome::Failed(_)));
        assert_eq!(outcomes[2].outcome, CollectionOutcome::Restored);
    }

    #[tokio::test]
    async fn test_collections_walked_in_configured_order() {
        let seed = tempfile::TempDir::new().unwrap();
        for name in ["b", "a", "c"] {
            std::fs::write(seed.path().join(format!("{name}.json")), b"[]").unwrap();
        }

        let layout = SnapshotLayout::SeedFiles {
            root: seed.path().to_path_buf(),
        };
        let restorer = FakeRestorer::new(&[]);
        let ordered = collections(&["b", "a", "c"]);

        run_collection_pass(&restorer, &layout, &ordered).await;
        assert_eq!(*restorer.calls.lock().unwrap(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_report_summary_wording() {
        let report = RestoreReport {
            skipped_nonempty: true,
            existing_collections: 4,
            outcomes: Vec::new(),
        };
        assert!(report.summary().contains("skipped"));

        let report = RestoreReport {
            skipped_nonempty: false,
            existing_collections: 0,
            outcomes: vec![
                CollectionRestore {
                    name: "projects".into(),
                    outcome: CollectionOutcome::Restored,
                },
                CollectionRestore {
                    name: "skills".into(),
                    outcome: CollectionOutcome::SkippedMissing,
                },
            ],
        };
        assert_eq!(report.summary(), "1 restored, 1 skipped-missing, 0 failed");
    }
}
