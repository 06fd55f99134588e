//! GitLab metadata mirror.
//!
//! Periodically copies projects, members, commits, merge requests and issues
//! from a GitLab instance into a local SQLite database. Runs are idempotent:
//! every record is upserted on its natural key, so repeating a run with an
//! unchanged remote leaves the store unchanged.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

use crate::config::Config;
use crate::db::store::SqliteStore;
use crate::error::AppError;
use crate::services::{GitLabClient, MemoryStore, SyncEngine};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Wire the HTTP client, the store and the engine together.
///
/// With `dry_run` the records go to an in-memory store that is discarded
/// with the engine, and no run history is written.
pub async fn build_engine(
    cfg: &Config,
    dry_run: bool,
    shutdown: CancellationToken,
) -> Result<Arc<SyncEngine>, AppError> {
    let client = Arc::new(GitLabClient::new(cfg.client_config())?);

    let engine = if dry_run {
        SyncEngine::new(client, Arc::new(MemoryStore::new()), cfg.sync_config())
    } else {
        let pool = db::initialize(&cfg.database.path).await?;
        log::info!("Database initialized at {}", cfg.database.path.display());
        SyncEngine::new(client, Arc::new(SqliteStore::new(pool.clone())), cfg.sync_config())
            .with_history(pool)
    };

    Ok(Arc::new(engine.with_shutdown(shutdown)))
}
