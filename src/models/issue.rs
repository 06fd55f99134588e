//! Issue model.
//!
//! Note: `assignees` and `labels` are stored as JSON strings in SQLite.

use super::{Mirrored, NaturalKey};
use crate::services::gitlab_client::{GitLabIssue, GitLabUser};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Opened,
    Closed,
}

impl From<&str> for IssueState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "closed" => Self::Closed,
            _ => Self::Opened,
        }
    }
}

/// An issue assignee as stored in the `assignees` JSON column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub username: String,
    pub name: String,
}

impl From<GitLabUser> for Assignee {
    fn from(user: GitLabUser) -> Self {
        Self {
            username: user.username,
            name: user.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Issue {
    pub project_id: i64,
    pub iid: i64,
    pub title: String,
    pub author_username: Option<String>,
    pub author_name: Option<String>,

    /// JSON array of `{username, name}` objects.
    pub assignees: String,

    /// Raw GitLab state: `opened` or `closed`.
    pub state: String,

    /// JSON array of label names.
    pub labels: String,

    pub created_at: Option<String>,
    pub closed_at: Option<String>,
}

impl Issue {
    pub fn from_remote(project_id: i64, remote: GitLabIssue) -> Self {
        let (author_username, author_name) = match remote.author {
            Some(author) => (Some(author.username), Some(author.name)),
            None => (None, None),
        };
        let assignees: Vec<Assignee> = remote
            .assignees
            .unwrap_or_default()
            .into_iter()
            .map(Assignee::from)
            .collect();
        let labels = remote.labels.unwrap_or_default();

        Self {
            project_id,
            iid: remote.iid,
            title: remote.title,
            author_username,
            author_name,
            assignees: serde_json::to_string(&assignees).unwrap_or_else(|_| "[]".to_string()),
            state: remote.state,
            labels: serde_json::to_string(&labels).unwrap_or_else(|_| "[]".to_string()),
            created_at: remote.created_at,
            closed_at: remote.closed_at,
        }
    }

    pub fn state_enum(&self) -> IssueState {
        IssueState::from(self.state.as_str())
    }

    /// Parse assignees from JSON string.
    pub fn assignees_vec(&self) -> Vec<Assignee> {
        serde_json::from_str(&self.assignees).unwrap_or_default()
    }

    /// Parse labels from JSON string.
    pub fn labels_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.labels).unwrap_or_default()
    }
}

impl Mirrored for Issue {
    fn natural_key(&self) -> NaturalKey {
        NaturalKey::scoped(self.project_id, self.iid)
    }
}

pub async fn upsert_issue<'e, E>(executor: E, issue: &Issue) -> Result<(), sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO issues (
            project_id, iid, title, author_username, author_name,
            assignees, state, labels, created_at, closed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, iid) DO UPDATE SET
            title = excluded.title,
            author_username = excluded.author_username,
            author_name = excluded.author_name,
            assignees = excluded.assignees,
            state = excluded.state,
            labels = excluded.labels,
            created_at = excluded.created_at,
            closed_at = excluded.closed_at
        "#,
    )
    .bind(issue.project_id)
    .bind(issue.iid)
    .bind(&issue.title)
    .bind(&issue.author_username)
    .bind(&issue.author_name)
    .bind(&issue.assignees)
    .bind(&issue.state)
    .bind(&issue.labels)
    .bind(&issue.created_at)
    .bind(&issue.closed_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn list_issues(
    pool: &sqlx::SqlitePool,
    project_id: i64,
) -> Result<Vec<Issue>, sqlx::Error> {
    sqlx::query_as::<_, Issue>(
        "SELECT project_id, iid, title, author_username, author_name, assignees, state, labels,
                created_at, closed_at
         FROM issues WHERE project_id = ? ORDER BY iid",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
}
