//! All interaction with the database and its point-in-time tools.
//!
//! Liveness and the collection inventory go through `mongosh --eval`; dumps
//! and restores go through the dedicated tools (`mongodump`, `mongorestore`,
//! `mongoimport`). Tool chatter is appended to per-tool logs under the
//! configured log directory.

use crate::config::AppConfig;
use anyhow::Context;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

const PING_TIMEOUT_SECS: u64 = 10;

pub struct MongoTools {
    cfg: AppConfig,
}

impl MongoTools {
    pub fn new(cfg: AppConfig) -> Self {
        Self { cfg }
    }

    /// Connection flags shared by every tool invocation.
    fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            "--host".into(),
            self.cfg.mongo_host.clone(),
            "--port".into(),
            self.cfg.mongo_port.to_string(),
        ];
        if let (Some(user), Some(pass)) =
            (&self.cfg.mongo_root_user, &self.cfg.mongo_root_password)
        {
            args.extend([
                "-u".into(),
                user.clone(),
                "-p".into(),
                pass.clone(),
                "--authenticationDatabase".into(),
                self.cfg.mongo_auth_db.clone(),
            ]);
        }
        args
    }

    async fn run_tool(
        &self,
        program: &str,
        args: Vec<String>,
        log_name: Option<&str>,
    ) -> anyhow::Result<std::process::Output> {
        let output = Command::new(program)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("failed to launch {program}"))?;

        if let Some(log_name) = log_name {
            self.append_log(log_name, &output.stderr);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{program} exited with {}: {}",
                output.status,
                last_lines(&stderr, 4)
            );
        }
        Ok(output)
    }

    fn append_log(&self, name: &str, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let path = self.cfg.log_dir.join(name);
        let result = std::fs::create_dir_all(&self.cfg.log_dir).and_then(|_| {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(bytes)
        });
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Could not append tool log");
        }
    }

    /// Trivial liveness probe. Any launch failure, timeout or non-ok
    /// response counts as unreachable.
    pub async fn ping(&self) -> bool {
        let mut args = self.connection_args();
        args.extend([
            "--quiet".into(),
            "--eval".into(),
            "db.adminCommand({ ping: 1 }).ok".into(),
        ]);

        let attempt = tokio::time::timeout(
            Duration::from_secs(PING_TIMEOUT_SECS),
            Command::new("mongosh").args(&args).output(),
        )
        .await;

        match attempt {
            Ok(Ok(out)) => {
                out.status.success()
                    && String::from_utf8_lossy(&out.stdout).trim().ends_with('1')
            }
            _ => false,
        }
    }

    /// Poll the liveness probe with a fixed interval until the database
    /// answers or the bounded retry budget is exhausted.
    pub async fn wait_ready(&self) -> anyhow::Result<()> {
        for attempt in 1..=self.cfg.readiness_attempts {
            if self.ping().await {
                tracing::info!(attempt, "Database is ready");
                return Ok(());
            }
            tracing::debug!(
                attempt,
                max = self.cfg.readiness_attempts,
                "Database not ready yet"
            );
            tokio::time::sleep(Duration::from_secs(self.cfg.readiness_interval_secs)).await;
        }
        anyhow::bail!(
            "database at {}:{} did not become ready after {} attempts",
            self.cfg.mongo_host,
            self.cfg.mongo_port,
            self.cfg.readiness_attempts
        )
    }

    /// Current collection names in the target database.
    pub async fn list_collections(&self) -> anyhow::Result<Vec<String>> {
        let eval = format!(
            "db.getSiblingDB('{}').getCollectionNames().join('\\n')",
            self.cfg.mongo_db
        );
        let mut args = self.connection_args();
        args.extend(["--quiet".into(), "--eval".into(), eval]);

        let output = self.run_tool("mongosh", args, None).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Full logical dump of the target database into `out_dir`
    /// (directory-per-database, file-per-collection layout).
    pub async fn dump(&self, out_dir: &Path) -> anyhow::Result<()> {
        let mut args = self.connection_args();
        args.extend([
            "--db".into(),
            self.cfg.mongo_db.clone(),
            "--out".into(),
            out_dir.display().to_string(),
        ]);
        self.run_tool("mongodump", args, Some("mongodump.log"))
            .await?;
        Ok(())
    }

    /// Replace one collection from a dumped `.bson` file.
    pub async fn restore_collection(&self, bson: &Path, collection: &str) -> anyhow::Result<()> {
        let mut args = self.connection_args();
        args.extend([
            "--db".into(),
            self.cfg.mongo_db.clone(),
            "--collection".into(),
            collection.to_string(),
            "--drop".into(),
            bson.display().to_string(),
        ]);
        self.run_tool("mongorestore", args, Some("mongorestore.log"))
            .await?;
        Ok(())
    }

    /// Replace one collection from a pre-staged JSON seed file.
    pub async fn import_collection(&self, file: &Path, collection: &str) -> anyhow::Result<()> {
        let mut args = self.connection_args();
        args.extend([
            "--db".into(),
            self.cfg.mongo_db.clone(),
            "--collection".into(),
            collection.to_string(),
            "--drop".into(),
            "--file".into(),
            file.display().to_string(),
        ]);
        self.run_tool("mongoimport", args, Some("mongorestore.log"))
            .await?;
        Ok(())
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" | ")
}
