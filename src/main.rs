//! mongo-backup - Main entry point.
//!
//! One binary, four roles: the supervising daemon, a one-shot backup run,
//! the one-shot restore bootstrap, and the health probe consumed by an
//! external liveness check.

use clap::{Parser, Subcommand, ValueEnum};
use mongo_backup::config::AppConfig;
use mongo_backup::logger;
use mongo_backup::services::backup::{run_backup, BackupMode};
use mongo_backup::services::health::{check_health, run_monitor};
use mongo_backup::services::metrics;
use mongo_backup::services::restore::restore_if_empty;
use mongo_backup::supervisor;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full daemon: database engine, scheduler, health loop, metrics
    Supervise,

    /// Run one backup now
    Backup {
        /// Informational only, behavior is identical across modes
        #[arg(long, value_enum, default_value_t = BackupMode::Manual)]
        mode: BackupMode,
    },

    /// Populate an untouched database from the latest snapshot (no-op when
    /// any real data exists)
    Restore,

    /// Check database liveness and backup freshness
    Health {
        #[arg(long, value_enum, default_value_t = HealthMode::Probe)]
        mode: HealthMode,
    },

    /// Serve the Prometheus metrics endpoint standalone
    Metrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HealthMode {
    /// One-shot check; exit code 0 healthy, 1 unreachable, 2 stale
    Probe,
    /// Infinite fixed-interval loop appending to the monitor log
    Monitor,
}

impl std::fmt::Display for HealthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthMode::Probe => write!(f, "probe"),
            HealthMode::Monitor => write!(f, "monitor"),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = AppConfig::from_env();

    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level).to_string();
    if let Err(e) = logger::init(&level) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        deployment = %cfg.deployment_id,
        "Starting mongo-backup"
    );

    match cli.command {
        Command::Supervise => match supervisor::run(cfg).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "Supervisor failed");
                ExitCode::FAILURE
            }
        },

        Command::Backup { mode } => match run_backup(&cfg, mode).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        },

        Command::Restore => match restore_if_empty(&cfg).await {
            Ok(report) => {
                tracing::info!(summary = %report.summary(), "Restore finished");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "Restore failed");
                ExitCode::FAILURE
            }
        },

        Command::Health { mode: HealthMode::Probe } => {
            let report = check_health(&cfg).await;
            println!("{}: {}", report.status, report.detail);
            ExitCode::from(report.status.exit_code())
        }

        Command::Health { mode: HealthMode::Monitor } => {
            let cancel = CancellationToken::new();
            let task = tokio::spawn(run_monitor(cfg, cancel.clone()));
            supervisor::shutdown_signal().await;
            cancel.cancel();
            let _ = task.await;
            ExitCode::SUCCESS
        }

        Command::Metrics => {
            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                supervisor::shutdown_signal().await;
                signal_cancel.cancel();
            });
            match metrics::serve(cfg, cancel).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "Metrics endpoint failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
