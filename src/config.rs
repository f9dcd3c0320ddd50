//! Environment-driven configuration.
//!
//! Everything is read once at startup; components receive a cloned
//! `AppConfig` by value so scheduled invocations never re-read the ambient
//! process environment.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mongo_host: String,
    pub mongo_port: u16,
    pub mongo_root_user: Option<String>,
    pub mongo_root_password: Option<String>,
    pub mongo_auth_db: String,
    /// Target application database.
    pub mongo_db: String,

    pub backup_dir: PathBuf,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,

    /// Number of most-recent archives to keep, locally and remotely.
    pub keep: usize,
    /// Six-field cron expression (with seconds) for scheduled backups.
    pub cron_schedule: String,
    /// Maximum acceptable age of the last successful backup.
    pub max_age_seconds: i64,
    /// Identifier embedded in archive names.
    pub deployment_id: String,

    pub restore_on_init: bool,
    /// Directory of pre-staged per-collection seed files bundled with the image.
    pub restore_seed_dir: Option<PathBuf>,
    /// Fixed, ordered list of collections the bootstrapper knows how to restore.
    pub restore_collections: Vec<String>,
    /// Reserved collection proving the database has been initialized once.
    pub sentinel_collection: String,

    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_key_prefix: String,

    pub readiness_attempts: u32,
    pub readiness_interval_secs: u64,
    pub health_interval_secs: u64,
    pub metrics_port: u16,

    pub mongod_bin: String,
    pub mongod_args: Vec<String>,
    pub log_level: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            mongo_host: env_or("MONGO_HOST", "127.0.0.1"),
            mongo_port: env_parse("MONGO_PORT", 27017),
            mongo_root_user: std::env::var("MONGO_ROOT_USER").ok(),
            mongo_root_password: std::env::var("MONGO_ROOT_PASSWORD").ok(),
            mongo_auth_db: env_or("MONGO_AUTH_DB", "admin"),
            mongo_db: env_or("MONGO_DB", "portfolio"),

            backup_dir: PathBuf::from(env_or("BACKUP_DIR", "/var/backups/mongo")),
            state_file: PathBuf::from(env_or("STATE_FILE", "/var/log/mongo-backup/state.json")),
            log_dir: PathBuf::from(env_or("LOG_DIR", "/var/log/mongo-backup")),

            keep: env_parse("BACKUP_KEEP", 5),
            cron_schedule: env_or("BACKUP_CRON", "0 0 3 * * *"),
            max_age_seconds: env_parse("BACKUP_MAX_AGE_SECONDS", 129_600),
            deployment_id: env_or("DEPLOYMENT_ID", "mongo"),

            restore_on_init: env_flag("RESTORE_ON_INIT", true),
            restore_seed_dir: std::env::var("RESTORE_SEED_DIR").ok().map(PathBuf::from),
            restore_collections: env_or(
                "RESTORE_COLLECTIONS",
                "projects,skills,experiences,messages,profiles",
            )
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
            sentinel_collection: env_or("SENTINEL_COLLECTION", "init_marker"),

            s3_bucket: std::env::var("S3_BUCKET").ok().filter(|v| !v.is_empty()),
            s3_region: std::env::var("S3_REGION").ok(),
            s3_endpoint: std::env::var("S3_ENDPOINT").ok(),
            s3_key_prefix: env_or("S3_KEY_PREFIX", "mongo-backups"),

            readiness_attempts: env_parse("READINESS_ATTEMPTS", 30),
            readiness_interval_secs: env_parse("READINESS_INTERVAL_SECS", 2),
            health_interval_secs: env_parse("HEALTH_INTERVAL_SECS", 60),
            metrics_port: env_parse("METRICS_PORT", 9217),

            mongod_bin: env_or("MONGOD_BIN", "mongod"),
            mongod_args: env_or("MONGOD_ARGS", "")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            log_level: env_or("LOG_LEVEL", "info"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_collection_list_is_ordered() {
        let cfg = AppConfig::from_env();
        assert!(!cfg.restore_collections.is_empty());
        // The bootstrapper relies on a stable iteration order.
        assert_eq!(cfg.restore_collections[0], "projects");
    }

    #[test]
    fn test_env_flag_defaults() {
        assert!(env_flag("MONGO_BACKUP_TEST_UNSET_FLAG", true));
        assert!(!env_flag("MONGO_BACKUP_TEST_UNSET_FLAG", false));
    }
}
