//! Per-kind syncers: drain a listing, map records, write one batch.

use crate::error::AppError;
use crate::models::{Commit, EntityKind, Issue, Member, MergeRequest, Project};
use crate::services::gitlab_client::{
    GitLabCommit, GitLabIssue, GitLabMember, GitLabMergeRequest, GitLabProject,
};
use crate::services::paginator::{Listing, PageSource, Paginator};
use crate::services::upsert::{UpsertBatch, UpsertWriter};
use serde::de::DeserializeOwned;

/// One project-scoped entity kind.
pub trait EntitySyncer {
    const KIND: EntityKind;

    /// Remote payload shape.
    type Remote: DeserializeOwned;

    /// Local record shape.
    type Record;

    fn listing(project_id: i64) -> Listing;

    fn to_record(project_id: i64, remote: Self::Remote) -> Self::Record;

    fn batch(records: Vec<Self::Record>) -> UpsertBatch;
}

pub struct MemberSyncer;
pub struct CommitSyncer;
pub struct MergeRequestSyncer;
pub struct IssueSyncer;

impl EntitySyncer for MemberSyncer {
    const KIND: EntityKind = EntityKind::Member;
    type Remote = GitLabMember;
    type Record = Member;

    fn listing(project_id: i64) -> Listing {
        Listing::members(project_id)
    }

    fn to_record(project_id: i64, remote: GitLabMember) -> Member {
        Member::from_remote(project_id, remote)
    }

    fn batch(records: Vec<Member>) -> UpsertBatch {
        UpsertBatch::Members(records)
    }
}

impl EntitySyncer for CommitSyncer {
    const KIND: EntityKind = EntityKind::Commit;
    type Remote = GitLabCommit;
    type Record = Commit;

    fn listing(project_id: i64) -> Listing {
        Listing::commits(project_id)
    }

    fn to_record(project_id: i64, remote: GitLabCommit) -> Commit {
        Commit::from_remote(project_id, remote)
    }

    fn batch(records: Vec<Commit>) -> UpsertBatch {
        UpsertBatch::Commits(records)
    }
}

impl EntitySyncer for MergeRequestSyncer {
    const KIND: EntityKind = EntityKind::MergeRequest;
    type Remote = GitLabMergeRequest;
    type Record = MergeRequest;

    fn listing(project_id: i64) -> Listing {
        Listing::merge_requests(project_id)
    }

    fn to_record(project_id: i64, remote: GitLabMergeRequest) -> MergeRequest {
        MergeRequest::from_remote(project_id, remote)
    }

    fn batch(records: Vec<MergeRequest>) -> UpsertBatch {
        UpsertBatch::MergeRequests(records)
    }
}

impl EntitySyncer for IssueSyncer {
    const KIND: EntityKind = EntityKind::Issue;
    type Remote = GitLabIssue;
    type Record = Issue;

    fn listing(project_id: i64) -> Listing {
        Listing::issues(project_id)
    }

    fn to_record(project_id: i64, remote: GitLabIssue) -> Issue {
        Issue::from_remote(project_id, remote)
    }

    fn batch(records: Vec<Issue>) -> UpsertBatch {
        UpsertBatch::Issues(records)
    }
}

/// Decode raw records from `listing` into `T`.
fn decode_all<T: DeserializeOwned>(
    listing: &Listing,
    raw: Vec<serde_json::Value>,
) -> Result<Vec<T>, AppError> {
    raw.into_iter()
        .map(|value| {
            serde_json::from_value(value).map_err(|e| AppError::decode(e.to_string(), &listing.path))
        })
        .collect()
}

/// Sync one entity kind of one project.
///
/// Returns the number of records processed. An empty listing returns 0
/// without calling the writer.
pub async fn sync_entity<S: EntitySyncer>(
    source: &dyn PageSource,
    writer: &dyn UpsertWriter,
    project_id: i64,
) -> Result<usize, AppError> {
    let listing = S::listing(project_id);
    let raw = Paginator::new(source, listing.clone()).collect_all().await?;
    if raw.is_empty() {
        log::debug!("[sync] project {}: no {}", project_id, S::KIND);
        return Ok(0);
    }

    let records: Vec<S::Record> = decode_all::<S::Remote>(&listing, raw)?
        .into_iter()
        .map(|remote| S::to_record(project_id, remote))
        .collect();
    let count = records.len();

    writer.upsert(S::batch(records)).await?;
    Ok(count)
}

/// Every project the token's user is a member of.
pub async fn list_projects(source: &dyn PageSource) -> Result<Vec<GitLabProject>, AppError> {
    let listing = Listing::projects();
    let raw = Paginator::new(source, listing.clone()).collect_all().await?;
    decode_all(&listing, raw)
}

/// Upsert a single project record.
pub async fn sync_project(
    writer: &dyn UpsertWriter,
    remote: &GitLabProject,
) -> Result<usize, AppError> {
    writer
        .upsert(UpsertBatch::Projects(vec![Project::from_remote(remote)]))
        .await?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NaturalKey;
    use crate::services::paginator::testing::ScriptedSource;
    use crate::services::upsert::MemoryStore;
    use serde_json::json;

    fn mr(iid: i64, state: &str) -> serde_json::Value {
        json!({
            "id": 1000 + iid,
            "iid": iid,
            "title": format!("MR {}", iid),
            "state": state,
            "author": {"id": 3, "username": "ada", "name": "Ada Lovelace"},
            "source_branch": "feature",
            "target_branch": "main"
        })
    }

    #[tokio::test]
    async fn test_empty_listing_issues_no_write() {
        let source = ScriptedSource::new();
        let store = MemoryStore::new();

        let count = sync_entity::<MemberSyncer>(&source, &store, 5).await.unwrap();

        assert_eq!(count, 0);
        assert_eq!(store.batches_for(EntityKind::Member), 0);
        assert_eq!(source.calls_to("/projects/5/members/all"), 1);
    }

    #[tokio::test]
    async fn test_one_batch_per_listing() {
        let commits: Vec<_> = (0..150)
            .map(|i| json!({"id": format!("sha{}", i), "short_id": format!("s{}", i)}))
            .collect();
        let source = ScriptedSource::new().with_pages(
            "/projects/5/repository/commits",
            vec![commits[..100].to_vec(), commits[100..].to_vec()],
        );
        let store = MemoryStore::new();

        let count = sync_entity::<CommitSyncer>(&source, &store, 5).await.unwrap();

        assert_eq!(count, 150);
        assert_eq!(store.batch_log(), vec![(EntityKind::Commit, 150)]);
        let stored = store
            .get(EntityKind::Commit, &NaturalKey::scoped(5, "sha0"))
            .unwrap();
        assert_eq!(stored["additions"], 0);
        assert_eq!(stored["total"], 0);
    }

    #[tokio::test]
    async fn test_merge_request_state_overwritten_in_place() {
        let source =
            ScriptedSource::new().with_pages("/projects/3/merge_requests", vec![vec![mr(7, "opened")]]);
        let store = MemoryStore::new();
        sync_entity::<MergeRequestSyncer>(&source, &store, 3).await.unwrap();

        source.set_pages("/projects/3/merge_requests", vec![vec![mr(7, "merged")]]);
        sync_entity::<MergeRequestSyncer>(&source, &store, 3).await.unwrap();

        assert_eq!(store.count(EntityKind::MergeRequest).await.unwrap(), 1);
        let stored = store
            .get(EntityKind::MergeRequest, &NaturalKey::scoped(3, 7))
            .unwrap();
        assert_eq!(stored["state"], "merged");
    }

    #[tokio::test]
    async fn test_fetch_error_propagates_without_write() {
        let source = ScriptedSource::new().with_failure("/projects/9/issues", 502);
        let store = MemoryStore::new();

        let err = sync_entity::<IssueSyncer>(&source, &store, 9).await.unwrap_err();

        assert_eq!(err.status(), Some(502));
        assert!(store.batch_log().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record_is_decode_error() {
        let source = ScriptedSource::new()
            .with_pages("/projects/1/members/all", vec![vec![json!({"id": "not-a-number"})]]);
        let store = MemoryStore::new();

        let err = sync_entity::<MemberSyncer>(&source, &store, 1).await.unwrap_err();

        match err {
            AppError::Decode { endpoint, .. } => {
                assert_eq!(endpoint.as_deref(), Some("/projects/1/members/all"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(store.batch_log().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_upsert_projects() {
        let source = ScriptedSource::new().with_pages(
            "/projects",
            vec![vec![json!({
                "id": 11,
                "name": "a",
                "path_with_namespace": "course/a",
                "web_url": "https://gitlab.test/course/a"
            })]],
        );
        let store = MemoryStore::new();

        let projects = list_projects(&source).await.unwrap();
        assert_eq!(projects.len(), 1);
        sync_project(&store, &projects[0]).await.unwrap();

        let stored = store.get(EntityKind::Project, &NaturalKey::Project(11)).unwrap();
        assert_eq!(stored["path_with_namespace"], "course/a");
    }
}
