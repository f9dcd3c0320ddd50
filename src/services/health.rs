//! Composite health: database liveness plus backup freshness.
//!
//! An unreachable database always wins over staleness so operators can tell
//! "database down" (exit 1) from "backups not running" (exit 2). A
//! deployment that has never completed a backup is reported healthy — a
//! brand-new instance should not page anyone before its first scheduled
//! run.

use crate::config::AppConfig;
use crate::mongo::MongoTools;
use crate::state::{BackupState, StateStore};
use chrono::{DateTime, Utc};
use std::io::Write;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Stale,
    Unreachable,
}

impl HealthStatus {
    /// `2` is reserved for staleness so orchestration can alert differently.
    pub fn exit_code(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unreachable => 1,
            HealthStatus::Stale => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Stale => write!(f, "stale"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub detail: String,
}

/// Pure classification over the two sub-checks.
pub fn classify(
    reachable: bool,
    state: &BackupState,
    now: DateTime<Utc>,
    max_age_seconds: i64,
) -> HealthReport {
    if !reachable {
        return HealthReport {
            status: HealthStatus::Unreachable,
            detail: "database did not answer the liveness probe".into(),
        };
    }

    match state.last_success {
        None => HealthReport {
            status: HealthStatus::Healthy,
            detail: "database reachable; no backup recorded yet".into(),
        },
        Some(last) => {
            let age = (now - last).num_seconds();
            if age > max_age_seconds {
                HealthReport {
                    status: HealthStatus::Stale,
                    detail: format!(
                        "last successful backup is {age}s old (max {max_age_seconds}s)"
                    ),
                }
            } else {
                HealthReport {
                    status: HealthStatus::Healthy,
                    detail: format!("last successful backup is {age}s old"),
                }
            }
        }
    }
}

/// One-shot check: liveness probe plus State Store cross-reference.
pub async fn check_health(cfg: &AppConfig) -> HealthReport {
    let mongo = MongoTools::new(cfg.clone());
    let reachable = mongo.ping().await;
    let state = StateStore::new(cfg.state_file.clone()).load();
    classify(reachable, &state, Utc::now(), cfg.max_age_seconds)
}

/// Continuous supervision loop: run the check at a fixed interval and
/// append timestamped OK/FAIL lines to the monitor log.
pub async fn run_monitor(cfg: AppConfig, cancel: CancellationToken) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(cfg.health_interval_secs));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let report = check_health(&cfg).await;
                match report.status {
                    HealthStatus::Healthy => {
                        tracing::info!(status = %report.status, detail = %report.detail, "Health check")
                    }
                    _ => {
                        tracing::warn!(status = %report.status, detail = %report.detail, "Health check")
                    }
                }
                append_monitor_line(&cfg, &report);
            }
        }
    }
    tracing::info!("Health monitor stopped");
}

fn append_monitor_line(cfg: &AppConfig, report: &HealthReport) {
    let line = format_monitor_line(Utc::now(), report);
    let path = cfg.log_dir.join("health-monitor.log");
    let result = std::fs::create_dir_all(&cfg.log_dir).and_then(|_| {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{line}")
    });
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "Could not append monitor log line");
    }
}

fn format_monitor_line(now: DateTime<Utc>, report: &HealthReport) -> String {
    let verdict = match report.status {
        HealthStatus::Healthy => "OK",
        _ => "FAIL",
    };
    format!(
        "{} {} {} - {}",
        now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        verdict,
        report.status,
        report.detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state_with_success(ts: DateTime<Utc>) -> BackupState {
        BackupState {
            last_success: Some(ts),
            total_backups: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_unreachable_wins_regardless_of_state() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let fresh = state_with_success(now);

        let report = classify(false, &fresh, now, 3600);
        assert_eq!(report.status, HealthStatus::Unreachable);
        assert_eq!(report.status.exit_code(), 1);
    }

    #[test]
    fn test_recent_backup_is_healthy() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let state = state_with_success(now - chrono::Duration::seconds(600));

        let report = classify(true, &state, now, 3600);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.status.exit_code(), 0);
    }

    #[test]
    fn test_old_backup_is_stale_with_distinct_exit_code() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let state = state_with_success(now - chrono::Duration::seconds(4000));

        let report = classify(true, &state, now, 3600);
        assert_eq!(report.status, HealthStatus::Stale);
        assert_eq!(report.status.exit_code(), 2);
        assert!(report.detail.contains("4000"));
    }

    #[test]
    fn test_age_exactly_at_threshold_is_still_healthy() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let state = state_with_success(now - chrono::Duration::seconds(3600));

        let report = classify(true, &state, now, 3600);
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_fresh_deployment_without_backups_is_healthy() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();

        let report = classify(true, &BackupState::default(), now, 3600);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.detail.contains("no backup recorded yet"));
    }

    #[test]
    fn test_recent_failure_with_recent_success_stays_healthy() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let mut state = state_with_success(now - chrono::Duration::seconds(60));
        state.last_failure = Some("upload refused".into());

        let report = classify(true, &state, now, 3600);
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_monitor_line_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let ok = HealthReport {
            status: HealthStatus::Healthy,
            detail: "all good".into(),
        };
        assert_eq!(
            format_monitor_line(now, &ok),
            "2026-03-14T12:00:00Z OK healthy - all good"
        );

        let bad = HealthReport {
            status: HealthStatus::Stale,
            detail: "too old".into(),
        };
        assert!(format_monitor_line(now, &bad).contains("FAIL stale"));
    }
}
