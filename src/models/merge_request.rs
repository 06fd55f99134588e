//! Merge request model.

use super::{Mirrored, NaturalKey};
use crate::services::gitlab_client::GitLabMergeRequest;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// State of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRequestState {
    Opened,
    Merged,
    Closed,
    Locked,
}

impl From<&str> for MergeRequestState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            "locked" => Self::Locked,
            _ => Self::Opened,
        }
    }
}

impl std::fmt::Display for MergeRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Merged => write!(f, "merged"),
            Self::Closed => write!(f, "closed"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// A merge request, keyed by its project-scoped `iid`.
///
/// `state` keeps the raw GitLab string so values added upstream survive a
/// round trip; use [`MergeRequest::state_enum`] to inspect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MergeRequest {
    pub project_id: i64,

    /// Project-scoped MR number.
    pub iid: i64,

    pub title: String,

    /// Null when GitLab omitted the author (e.g., deleted users).
    pub author_username: Option<String>,
    pub author_name: Option<String>,

    pub state: String,
    pub created_at: Option<String>,
    pub merged_at: Option<String>,
    pub closed_at: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub merge_commit_sha: Option<String>,
}

impl MergeRequest {
    pub fn from_remote(project_id: i64, remote: GitLabMergeRequest) -> Self {
        let (author_username, author_name) = match remote.author {
            Some(author) => (Some(author.username), Some(author.name)),
            None => (None, None),
        };
        Self {
            project_id,
            iid: remote.iid,
            title: remote.title,
            author_username,
            author_name,
            state: remote.state,
            created_at: remote.created_at,
            merged_at: remote.merged_at,
            closed_at: remote.closed_at,
            source_branch: remote.source_branch,
            target_branch: remote.target_branch,
            merge_commit_sha: remote.merge_commit_sha,
        }
    }

    /// Parse the state string into an enum.
    pub fn state_enum(&self) -> MergeRequestState {
        MergeRequestState::from(self.state.as_str())
    }
}

impl Mirrored for MergeRequest {
    fn natural_key(&self) -> NaturalKey {
        NaturalKey::scoped(self.project_id, self.iid)
    }
}

pub async fn upsert_merge_request<'e, E>(executor: E, mr: &MergeRequest) -> Result<(), sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO merge_requests (
            project_id, iid, title, author_username, author_name, state,
            created_at, merged_at, closed_at, source_branch, target_branch, merge_commit_sha
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, iid) DO UPDATE SET
            title = excluded.title,
            author_username = excluded.author_username,
            author_name = excluded.author_name,
            state = excluded.state,
            created_at = excluded.created_at,
            merged_at = excluded.merged_at,
            closed_at = excluded.closed_at,
            source_branch = excluded.source_branch,
            target_branch = excluded.target_branch,
            merge_commit_sha = excluded.merge_commit_sha
        "#,
    )
    .bind(mr.project_id)
    .bind(mr.iid)
    .bind(&mr.title)
    .bind(&mr.author_username)
    .bind(&mr.author_name)
    .bind(&mr.state)
    .bind(&mr.created_at)
    .bind(&mr.merged_at)
    .bind(&mr.closed_at)
    .bind(&mr.source_branch)
    .bind(&mr.target_branch)
    .bind(&mr.merge_commit_sha)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn list_merge_requests(
    pool: &sqlx::SqlitePool,
    project_id: i64,
) -> Result<Vec<MergeRequest>, sqlx::Error> {
    sqlx::query_as::<_, MergeRequest>(
        "SELECT project_id, iid, title, author_username, author_name, state, created_at,
                merged_at, closed_at, source_branch, target_branch, merge_commit_sha
         FROM merge_requests WHERE project_id = ? ORDER BY iid",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
}
