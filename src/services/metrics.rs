//! Prometheus text endpoint over the State Store.
//!
//! Read-only: the gauges are derived from the state file on every scrape,
//! so the endpoint needs no coordination with the Backup Executor.

use crate::config::AppConfig;
use crate::state::{BackupState, StateStore};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub fn render(state: &BackupState, now: DateTime<Utc>) -> String {
    let last_success = state.last_success.map(|ts| ts.timestamp()).unwrap_or(0);
    let age = if last_success > 0 {
        now.timestamp() - last_success
    } else {
        0
    };
    let failure_message = state
        .last_failure
        .as_deref()
        .unwrap_or("")
        .replace('\\', "\\\\")
        .replace('"', "\\\"");
    let failure_flag = if state.last_failure.is_some() { 1 } else { 0 };

    [
        format!("mongo_backup_last_success_timestamp {last_success}"),
        format!("mongo_backup_last_run_age_seconds {age}"),
        format!("mongo_backup_last_archive_bytes {}", state.last_size_bytes),
        format!("mongo_backup_total_runs {}", state.total_backups),
        format!("mongo_backup_last_failure{{message=\"{failure_message}\"}} {failure_flag}"),
    ]
    .join("\n")
}

async fn metrics(State(store): State<Arc<StateStore>>) -> impl IntoResponse {
    let body = render(&store.load(), Utc::now());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

pub fn router(cfg: &AppConfig) -> Router {
    let store = Arc::new(StateStore::new(cfg.state_file.clone()));
    Router::new()
        .route("/metrics", get(metrics))
        .route("/", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

pub async fn serve(cfg: AppConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let app = router(&cfg);
    let addr = format!("0.0.0.0:{}", cfg.metrics_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Metrics endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}
