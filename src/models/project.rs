//! Mirrored project metadata.

use super::{Mirrored, NaturalKey};
use crate::services::gitlab_client::GitLabProject;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A project the token's user is a member of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Project {
    /// GitLab project ID (global).
    pub project_id: i64,

    /// Short project name (e.g., "GitLab").
    pub name: String,

    /// Path with namespace (e.g., "gitlab-org/gitlab").
    pub path_with_namespace: String,

    pub description: Option<String>,

    /// ISO 8601 creation timestamp from GitLab.
    pub created_at: Option<String>,

    /// Empty repositories have no default branch.
    pub default_branch: Option<String>,

    pub web_url: String,
}

impl Project {
    pub fn from_remote(remote: &GitLabProject) -> Self {
        Self {
            project_id: remote.id,
            name: remote.name.clone(),
            path_with_namespace: remote.path_with_namespace.clone(),
            description: remote.description.clone(),
            created_at: remote.created_at.clone(),
            default_branch: remote.default_branch.clone(),
            web_url: remote.web_url.clone(),
        }
    }
}

impl Mirrored for Project {
    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Project(self.project_id)
    }
}

/// Look up a project by its GitLab id.
pub async fn get_project(
    pool: &sqlx::SqlitePool,
    project_id: i64,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "SELECT project_id, name, path_with_namespace, description, created_at, default_branch, web_url
         FROM projects WHERE project_id = ?",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
}

/// Insert a project or overwrite every field of the existing row.
pub async fn upsert_project<'e, E>(executor: E, project: &Project) -> Result<(), sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO projects (project_id, name, path_with_namespace, description, created_at, default_branch, web_url)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(project_id) DO UPDATE SET
           name = excluded.name,
           path_with_namespace = excluded.path_with_namespace,
           description = excluded.description,
           created_at = excluded.created_at,
           default_branch = excluded.default_branch,
           web_url = excluded.web_url",
    )
    .bind(project.project_id)
    .bind(&project.name)
    .bind(&project.path_with_namespace)
    .bind(&project.description)
    .bind(&project.created_at)
    .bind(&project.default_branch)
    .bind(&project.web_url)
    .execute(executor)
    .await?;

    Ok(())
}
