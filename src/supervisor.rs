//! Process supervisor: owns the database engine, the cron scheduler and the
//! health monitor loop.
//!
//! Startup ordering is strict: directories first, then mongod, then the
//! one-shot restore bootstrap, and only after that the scheduler, the
//! health loop and the metrics endpoint. mongod is restarted on crash;
//! termination signals are forwarded to it before the supervisor exits.

use crate::config::AppConfig;
use crate::mongo::MongoTools;
use crate::services::health::run_monitor;
use crate::services::metrics;
use crate::services::restore::restore_if_empty;
use crate::services::scheduler::BackupScheduler;
use anyhow::Context;
use std::process::Stdio;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

const MONGOD_RESTART_DELAY_SECS: u64 = 5;
const MONGOD_STOP_TIMEOUT_SECS: u64 = 15;

pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cfg.backup_dir)
        .with_context(|| format!("creating {}", cfg.backup_dir.display()))?;
    std::fs::create_dir_all(&cfg.log_dir)
        .with_context(|| format!("creating {}", cfg.log_dir.display()))?;

    let cancel = CancellationToken::new();
    let stop_timeout = Duration::from_secs(MONGOD_STOP_TIMEOUT_SECS);

    let mongod_task = tokio::spawn(run_mongod(cfg.clone(), cancel.clone()));

    // Everything below depends on the database being in its final initial
    // state, so a startup failure tears the engine down and aborts.
    let mongo = MongoTools::new(cfg.clone());
    if let Err(e) = mongo.wait_ready().await {
        cancel.cancel();
        let _ = tokio::time::timeout(stop_timeout, mongod_task).await;
        return Err(e);
    }

    if cfg.restore_on_init {
        match restore_if_empty(&cfg).await {
            Ok(report) => {
                tracing::info!(summary = %report.summary(), "Restore bootstrap finished")
            }
            Err(e) => {
                cancel.cancel();
                let _ = tokio::time::timeout(stop_timeout, mongod_task).await;
                return Err(e);
            }
        }
    } else {
        tracing::info!("Restore on init disabled");
    }

    let scheduler = BackupScheduler::new(cfg.clone()).await?;
    scheduler.schedule().await?;
    scheduler.start().await?;

    let monitor_task = tokio::spawn(run_monitor(cfg.clone(), cancel.clone()));

    let metrics_task = {
        let cfg = cfg.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(cfg, cancel).await {
                tracing::error!(error = %e, "Metrics endpoint stopped with error");
            }
        })
    };

    shutdown_signal().await;
    tracing::info!("Shutting down...");
    cancel.cancel();

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Scheduler shutdown error");
    }

    if tokio::time::timeout(stop_timeout, mongod_task).await.is_err() {
        tracing::warn!("mongod did not stop in time");
    }
    let _ = tokio::time::timeout(Duration::from_secs(2), monitor_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), metrics_task).await;

    tracing::info!("Supervisor stopped");
    Ok(())
}

/// Keep mongod running until cancellation, restarting it on crash. Engine
/// output is captured into `{log_dir}/mongod.log`.
async fn run_mongod(cfg: AppConfig, cancel: CancellationToken) {
    loop {
        match spawn_mongod(&cfg) {
            Ok(mut child) => {
                tracing::info!(bin = %cfg.mongod_bin, "Database engine started");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        terminate_child(&mut child).await;
                        break;
                    }
                    status = child.wait() => {
                        tracing::warn!(
                            ?status,
                            "Database engine exited, restarting in {}s",
                            MONGOD_RESTART_DELAY_SECS
                        );
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not start database engine");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(MONGOD_RESTART_DELAY_SECS)) => {}
        }
    }
    tracing::info!("Database engine supervision stopped");
}

fn spawn_mongod(cfg: &AppConfig) -> anyhow::Result<tokio::process::Child> {
    let log_path = cfg.log_dir.join("mongod.log");
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;
    let log_err = log.try_clone()?;

    let child = tokio::process::Command::new(&cfg.mongod_bin)
        .args(&cfg.mongod_args)
        .arg("--port")
        .arg(cfg.mongo_port.to_string())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .with_context(|| format!("spawning {}", cfg.mongod_bin))?;
    Ok(child)
}

/// Forward SIGTERM and wait, falling back to a hard kill.
async fn terminate_child(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
    let grace = Duration::from_secs(MONGOD_STOP_TIMEOUT_SECS - 5);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        tracing::warn!("Database engine ignored SIGTERM, killing");
        let _ = child.kill().await;
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
