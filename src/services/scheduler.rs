//! Cron wiring for scheduled backup runs.
//!
//! The job closure captures a clone of the configuration, so scheduled
//! invocations never re-read the process environment. A single in-process
//! flag skips a tick that fires while the previous run is still going;
//! there is deliberately no cross-process lock (single-node scope).

use crate::config::AppConfig;
use crate::services::backup::{run_backup, BackupMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    cfg: AppConfig,
    running: Arc<AtomicBool>,
}

impl BackupScheduler {
    pub async fn new(cfg: AppConfig) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            cfg,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn schedule(&self) -> anyhow::Result<()> {
        let cfg = self.cfg.clone();
        let running = self.running.clone();

        let job = Job::new_async(self.cfg.cron_schedule.as_str(), move |_uuid, _lock| {
            let cfg = cfg.clone();
            let running = running.clone();
            Box::pin(async move {
                if running.swap(true, Ordering::SeqCst) {
                    tracing::warn!("Skipping scheduled run: previous backup still in progress");
                    return;
                }

                if let Err(e) = run_backup(&cfg, BackupMode::Cron).await {
                    tracing::error!(error = %e, "Scheduled backup failed");
                }

                running.store(false, Ordering::SeqCst);
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %self.cfg.cron_schedule, "Backup schedule installed");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
