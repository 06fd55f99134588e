//! Project membership model.

use super::{Mirrored, NaturalKey};
use crate::services::gitlab_client::GitLabMember;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// GitLab access level of a maintainer.
pub const ACCESS_LEVEL_MAINTAINER: i64 = 40;

/// A user with access to a project, including inherited members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub project_id: i64,
    pub user_id: i64,
    pub username: String,
    pub name: String,
    /// Numeric GitLab access level (10 guest .. 50 owner).
    pub access_level: i64,
}

impl Member {
    pub fn from_remote(project_id: i64, remote: GitLabMember) -> Self {
        Self {
            project_id,
            user_id: remote.id,
            username: remote.username,
            name: remote.name,
            access_level: remote.access_level,
        }
    }

    /// Maintainers and owners.
    pub fn is_staff(&self) -> bool {
        self.access_level >= ACCESS_LEVEL_MAINTAINER
    }
}

impl Mirrored for Member {
    fn natural_key(&self) -> NaturalKey {
        NaturalKey::scoped(self.project_id, self.user_id)
    }
}

pub async fn upsert_member<'e, E>(executor: E, member: &Member) -> Result<(), sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO members (project_id, user_id, username, name, access_level)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(project_id, user_id) DO UPDATE SET
           username = excluded.username,
           name = excluded.name,
           access_level = excluded.access_level",
    )
    .bind(member.project_id)
    .bind(member.user_id)
    .bind(&member.username)
    .bind(&member.name)
    .bind(member.access_level)
    .execute(executor)
    .await?;

    Ok(())
}

/// Members of one project, ordered by user id.
pub async fn list_members(
    pool: &sqlx::SqlitePool,
    project_id: i64,
) -> Result<Vec<Member>, sqlx::Error> {
    sqlx::query_as::<_, Member>(
        "SELECT project_id, user_id, username, name, access_level
         FROM members WHERE project_id = ? ORDER BY user_id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
}
