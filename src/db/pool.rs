//! SQLite connection pool with WAL mode.
//!
//! WAL lets the reporting side read the mirror while a sync run is writing.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Connection settings shared by every pooled connection.
fn connect_options(db_path: &Path) -> Result<SqliteConnectOptions, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        // Batched upserts from concurrent project workers can queue behind each other
        .busy_timeout(Duration::from_secs(30))
        .pragma("wal_autocheckpoint", "1000");
    Ok(options)
}

/// Create a new connection pool with WAL mode enabled.
///
/// The parent directory must already exist; `create_if_missing` only
/// creates the file.
pub async fn create_pool(db_path: &Path) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options(db_path)?)
        .await?;

    let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;
    if !mode.0.eq_ignore_ascii_case("wal") {
        log::warn!("SQLite journal mode is {} instead of WAL", mode.0);
    }

    Ok(pool)
}
