//! Data models for the mirrored entities.
//!
//! Each model is the local shape of one GitLab entity kind: the row stored in
//! SQLite, the mapping from the remote payload, and the natural key that
//! identifies it across syncs.

pub mod commit;
pub mod issue;
pub mod member;
pub mod merge_request;
pub mod project;
pub mod sync_run;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use commit::Commit;
pub use issue::{Assignee, Issue, IssueState};
pub use member::Member;
pub use merge_request::{MergeRequest, MergeRequestState};
pub use project::Project;
pub use sync_run::{FailedProject, RunOutcome, RunSummary, RunTrigger};

/// The five entity kinds mirrored per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Member,
    Commit,
    MergeRequest,
    Issue,
}

impl EntityKind {
    /// All kinds, in the order a project is synced.
    pub const ALL: [EntityKind; 5] = [
        Self::Project,
        Self::Member,
        Self::Commit,
        Self::MergeRequest,
        Self::Issue,
    ];

    /// Table holding this kind.
    pub fn table(self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::Member => "members",
            Self::Commit => "commits",
            Self::MergeRequest => "merge_requests",
            Self::Issue => "issues",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Identity of a mirrored record, used as the upsert filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NaturalKey {
    /// Projects are keyed by their global id.
    Project(i64),
    /// Everything else is scoped to a project.
    Scoped { project_id: i64, id: String },
}

impl NaturalKey {
    pub fn scoped(project_id: i64, id: impl ToString) -> Self {
        Self::Scoped {
            project_id,
            id: id.to_string(),
        }
    }

    pub fn project_id(&self) -> i64 {
        match self {
            Self::Project(id) => *id,
            Self::Scoped { project_id, .. } => *project_id,
        }
    }
}

/// A record the mirror stores under a natural key.
pub trait Mirrored: Serialize {
    fn natural_key(&self) -> NaturalKey;
}

/// Per-kind record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub projects: i64,
    pub members: i64,
    pub commits: i64,
    pub merge_requests: i64,
    pub issues: i64,
}

impl KindCounts {
    pub fn get(&self, kind: EntityKind) -> i64 {
        match kind {
            EntityKind::Project => self.projects,
            EntityKind::Member => self.members,
            EntityKind::Commit => self.commits,
            EntityKind::MergeRequest => self.merge_requests,
            EntityKind::Issue => self.issues,
        }
    }

    pub fn add(&mut self, kind: EntityKind, n: i64) {
        let slot = match kind {
            EntityKind::Project => &mut self.projects,
            EntityKind::Member => &mut self.members,
            EntityKind::Commit => &mut self.commits,
            EntityKind::MergeRequest => &mut self.merge_requests,
            EntityKind::Issue => &mut self.issues,
        };
        *slot += n;
    }

    pub fn merge(&mut self, other: &KindCounts) {
        for kind in EntityKind::ALL {
            self.add(kind, other.get(kind));
        }
    }
}

impl fmt::Display for KindCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects={} members={} commits={} merge_requests={} issues={}",
            self.projects, self.members, self.commits, self.merge_requests, self.issues
        )
    }
}
