//! SQLite-backed upsert writer.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{commit, issue, member, merge_request, project, EntityKind, KindCounts};
use crate::services::upsert::{UpsertBatch, UpsertWriter};
use async_trait::async_trait;

/// Store client over the mirror database.
///
/// Each batch is written in a single transaction, so a reader never sees
/// half of one entity kind's batch for a project.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Totals for every kind.
    pub async fn totals(&self) -> Result<KindCounts, AppError> {
        let mut totals = KindCounts::default();
        for kind in EntityKind::ALL {
            totals.add(kind, self.count(kind).await?);
        }
        Ok(totals)
    }
}

#[async_trait]
impl UpsertWriter for SqliteStore {
    async fn upsert(&self, batch: UpsertBatch) -> Result<u64, AppError> {
        let kind = batch.kind();
        let op = format!("upsert {}", kind);
        let db_err = |e: sqlx::Error| AppError::database_with_op(e.to_string(), op.clone());

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let written = batch.len() as u64;

        match &batch {
            UpsertBatch::Projects(records) => {
                for r in records {
                    project::upsert_project(&mut *tx, r).await.map_err(db_err)?;
                }
            }
            UpsertBatch::Members(records) => {
                for r in records {
                    member::upsert_member(&mut *tx, r).await.map_err(db_err)?;
                }
            }
            UpsertBatch::Commits(records) => {
                for r in records {
                    commit::upsert_commit(&mut *tx, r).await.map_err(db_err)?;
                }
            }
            UpsertBatch::MergeRequests(records) => {
                for r in records {
                    merge_request::upsert_merge_request(&mut *tx, r)
                        .await
                        .map_err(db_err)?;
                }
            }
            UpsertBatch::Issues(records) => {
                for r in records {
                    issue::upsert_issue(&mut *tx, r).await.map_err(db_err)?;
                }
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(written)
    }

    async fn count(&self, kind: EntityKind) -> Result<i64, AppError> {
        // Table names come from a closed enum, never from input.
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        let count: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count.0)
    }
}
