//! Commit model with per-commit change statistics.

use super::{Mirrored, NaturalKey};
use crate::services::gitlab_client::GitLabCommit;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Commit {
    pub project_id: i64,

    /// Full commit SHA.
    pub sha: String,

    pub short_id: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,

    /// ISO 8601 commit timestamp.
    pub committed_date: Option<String>,

    pub message: Option<String>,

    /// Lines added; 0 when GitLab returned no stats.
    pub additions: i64,

    /// Lines removed; 0 when GitLab returned no stats.
    pub deletions: i64,

    pub total: i64,
}

impl Commit {
    pub fn from_remote(project_id: i64, remote: GitLabCommit) -> Self {
        let stats = remote.stats.unwrap_or_default();
        Self {
            project_id,
            sha: remote.id,
            short_id: remote.short_id,
            author_name: remote.author_name,
            author_email: remote.author_email,
            committed_date: remote.committed_date,
            message: remote.message,
            additions: stats.additions,
            deletions: stats.deletions,
            total: stats.total,
        }
    }
}

impl Mirrored for Commit {
    fn natural_key(&self) -> NaturalKey {
        NaturalKey::scoped(self.project_id, &self.sha)
    }
}

pub async fn upsert_commit<'e, E>(executor: E, commit: &Commit) -> Result<(), sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO commits (
            project_id, sha, short_id, author_name, author_email,
            committed_date, message, additions, deletions, total
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, sha) DO UPDATE SET
            short_id = excluded.short_id,
            author_name = excluded.author_name,
            author_email = excluded.author_email,
            committed_date = excluded.committed_date,
            message = excluded.message,
            additions = excluded.additions,
            deletions = excluded.deletions,
            total = excluded.total
        "#,
    )
    .bind(commit.project_id)
    .bind(&commit.sha)
    .bind(&commit.short_id)
    .bind(&commit.author_name)
    .bind(&commit.author_email)
    .bind(&commit.committed_date)
    .bind(&commit.message)
    .bind(commit.additions)
    .bind(commit.deletions)
    .bind(commit.total)
    .execute(executor)
    .await?;

    Ok(())
}

/// Commits of one project, newest first.
pub async fn list_commits(
    pool: &sqlx::SqlitePool,
    project_id: i64,
) -> Result<Vec<Commit>, sqlx::Error> {
    sqlx::query_as::<_, Commit>(
        "SELECT project_id, sha, short_id, author_name, author_email, committed_date, message,
                additions, deletions, total
         FROM commits WHERE project_id = ? ORDER BY committed_date DESC, sha",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
}
