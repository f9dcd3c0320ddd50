//! Archive naming and tar.gz packing.
//!
//! Archives are immutable artifacts named `{deployment-id}-{timestamp}.tar.gz`
//! and are ordered purely by the timestamp embedded in the name. Retention
//! works on names alone so the same selection logic applies to a local
//! directory listing and a bucket listing.

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::Path;

use crate::state::TIMESTAMP_FORMAT;

pub fn archive_name(deployment_id: &str, ts: DateTime<Utc>) -> String {
    format!("{}-{}.tar.gz", deployment_id, ts.format(TIMESTAMP_FORMAT))
}

/// Extract the embedded timestamp from an archive name. Returns `None` for
/// names that do not belong to this deployment or do not parse, so foreign
/// files sharing the directory or bucket prefix are never retention victims.
pub fn parse_timestamp(name: &str, deployment_id: &str) -> Option<DateTime<Utc>> {
    let stem = name
        .strip_prefix(deployment_id)?
        .strip_prefix('-')?
        .strip_suffix(".tar.gz")?;
    NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT)
        .ok()
        .map(|n| n.and_utc())
}

/// Archive names in newest-first order, ignoring anything unparseable.
pub fn sorted_newest_first(names: &[String], deployment_id: &str) -> Vec<String> {
    let mut dated: Vec<(DateTime<Utc>, &String)> = names
        .iter()
        .filter_map(|n| parse_timestamp(n, deployment_id).map(|ts| (ts, n)))
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    dated.into_iter().map(|(_, n)| n.clone()).collect()
}

/// Names that fall outside the keep-window and should be deleted.
pub fn retention_victims(names: &[String], deployment_id: &str, keep: usize) -> Vec<String> {
    sorted_newest_first(names, deployment_id)
        .into_iter()
        .skip(keep)
        .collect()
}

/// The single most recent archive, if any.
pub fn latest(names: &[String], deployment_id: &str) -> Option<String> {
    sorted_newest_first(names, deployment_id).into_iter().next()
}

/// Compress the contents of `src_dir` into a single tar.gz at `dest`.
/// Returns the archive size in bytes.
pub fn pack(src_dir: &Path, dest: &Path) -> anyhow::Result<u64> {
    let file = File::create(dest)
        .with_context(|| format!("creating archive {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(".", src_dir)
        .with_context(|| format!("archiving {}", src_dir.display()))?;
    let encoder = builder.into_inner().context("finalizing tar stream")?;
    let file = encoder.finish().context("finalizing gzip stream")?;
    file.sync_all().context("flushing archive to disk")?;
    Ok(file.metadata()?.len())
}

/// Extract a tar.gz archive into `dest_dir`.
pub fn unpack(archive: &Path, dest_dir: &Path) -> anyhow::Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("opening archive {}", archive.display()))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    std::fs::create_dir_all(dest_dir)?;
    tar.unpack(dest_dir)
        .with_context(|| format!("extracting into {}", dest_dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_archive_name_round_trips() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 3, 0, 5).unwrap();
        let name = archive_name("mongo", ts);
        assert_eq!(name, "mongo-20260314_030005.tar.gz");
        assert_eq!(parse_timestamp(&name, "mongo"), Some(ts));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_timestamp("other-20260314_030005.tar.gz", "mongo").is_none());
        assert!(parse_timestamp("mongo-notadate.tar.gz", "mongo").is_none());
        assert!(parse_timestamp("mongo-20260314_030005.tgz", "mongo").is_none());
        assert!(parse_timestamp("state.json", "mongo").is_none());
    }

    #[test]
    fn test_retention_keeps_k_most_recent() {
        let all = names(&[
            "mongo-20260101_000000.tar.gz",
            "mongo-20260301_000000.tar.gz",
            "mongo-20260201_000000.tar.gz",
            "mongo-20260401_000000.tar.gz",
        ]);
        let victims = retention_victims(&all, "mongo", 2);
        assert_eq!(
            victims,
            names(&["mongo-20260201_000000.tar.gz", "mongo-20260101_000000.tar.gz"])
        );
    }

    #[test]
    fn test_retention_keeps_min_of_k_and_n() {
        let all = names(&["mongo-20260101_000000.tar.gz"]);
        assert!(retention_victims(&all, "mongo", 5).is_empty());
        assert!(retention_victims(&[], "mongo", 5).is_empty());
    }

    #[test]
    fn test_retention_ignores_unrelated_files() {
        let all = names(&[
            "mongo-20260101_000000.tar.gz",
            "scratch-abc123",
            "state.json",
        ]);
        assert!(retention_victims(&all, "mongo", 1).is_empty());
    }

    #[test]
    fn test_latest_picks_newest_by_embedded_timestamp() {
        let all = names(&[
            "mongo-20260201_000000.tar.gz",
            "mongo-20260401_120000.tar.gz",
            "mongo-20260301_000000.tar.gz",
        ]);
        assert_eq!(
            latest(&all, "mongo"),
            Some("mongo-20260401_120000.tar.gz".to_string())
        );
        assert_eq!(latest(&[], "mongo"), None);
    }

    #[test]
    fn test_pack_and_unpack_preserve_dump_layout() {
        let src = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("portfolio")).unwrap();
        std::fs::write(src.path().join("portfolio/projects.bson"), b"fake bson").unwrap();
        std::fs::write(src.path().join("portfolio/projects.metadata.json"), b"{}").unwrap();

        let work = TempDir::new().unwrap();
        let archive = work.path().join("mongo-20260101_000000.tar.gz");
        let size = pack(src.path(), &archive).unwrap();
        assert!(size > 0);
        assert_eq!(std::fs::metadata(&archive).unwrap().len(), size);

        let out = TempDir::new().unwrap();
        unpack(&archive, out.path()).unwrap();
        assert_eq!(
            std::fs::read(out.path().join("portfolio/projects.bson")).unwrap(),
            b"fake bson"
        );
    }
}
