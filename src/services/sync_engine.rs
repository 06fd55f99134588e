//! Sync orchestrator.
//!
//! One run lists every accessible project and, per project, upserts the
//! project record and then members, commits, merge requests and issues, in
//! that order. Runs are serialized by a single-slot run lock; a trigger that
//! arrives while a run is active is rejected, not queued.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::sync_run::{self, MAX_RUN_HISTORY};
use crate::models::{EntityKind, FailedProject, KindCounts, RunOutcome, RunSummary, RunTrigger};
use crate::services::entity_sync::{
    self, CommitSyncer, IssueSyncer, MemberSyncer, MergeRequestSyncer,
};
use crate::services::gitlab_client::GitLabProject;
use crate::services::paginator::PageSource;
use crate::services::upsert::UpsertWriter;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// What a run does when one project fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the whole run at the first error. Finished projects keep their writes.
    #[default]
    AbortRun,
    /// Record the failure and continue with the remaining projects.
    IsolateProject,
}

/// Which listed projects a run syncs.
///
/// Both rules apply when both are set. An empty selection keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSelection {
    /// Keep projects whose `path_with_namespace` contains this substring.
    pub filter: Option<String>,
    /// Keep only these `path_with_namespace` values.
    pub paths: Vec<String>,
}

impl ProjectSelection {
    pub fn is_empty(&self) -> bool {
        self.filter.is_none() && self.paths.is_empty()
    }

    pub fn matches(&self, path_with_namespace: &str) -> bool {
        let by_filter = self
            .filter
            .as_deref()
            .map_or(true, |needle| path_with_namespace.contains(needle));
        let by_path =
            self.paths.is_empty() || self.paths.iter().any(|p| p == path_with_namespace);
        by_filter && by_path
    }
}

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Projects processed concurrently; entity kinds within a project stay sequential.
    pub max_concurrent_projects: usize,

    pub failure_policy: FailurePolicy,

    /// Pause before starting each project after the first.
    pub project_delay: Duration,

    pub selection: ProjectSelection,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_projects: 1,
            failure_policy: FailurePolicy::AbortRun,
            project_delay: Duration::ZERO,
            selection: ProjectSelection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    /// Last run failed; cleared by the next run.
    Failed,
}

/// Status of the sync engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub state: RunState,

    /// Summary of the most recent finished run.
    pub last_run: Option<RunSummary>,
}

/// Clears the run lock when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Result of one project's pass.
struct ProjectPass {
    project: GitLabProject,
    counts: KindCounts,
    result: Result<(), AppError>,
}

/// Accumulated while a run is in flight.
#[derive(Default)]
struct RunProgress {
    listed: usize,
    processed: usize,
    failed: Vec<FailedProject>,
    synced: KindCounts,
    fatal: Option<AppError>,
}

/// Orchestrates sync runs against one GitLab instance and one store.
pub struct SyncEngine {
    source: Arc<dyn PageSource>,
    writer: Arc<dyn UpsertWriter>,

    /// Where run summaries are recorded, if anywhere.
    history: Option<DbPool>,

    config: SyncConfig,
    status: Arc<RwLock<SyncStatus>>,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn PageSource>,
        writer: Arc<dyn UpsertWriter>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            writer,
            history: None,
            config,
            status: Arc::new(RwLock::new(SyncStatus::default())),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Record every run summary in the `sync_runs` table of `pool`.
    pub fn with_history(mut self, pool: DbPool) -> Self {
        self.history = Some(pool);
        self
    }

    /// Use `token` to stop runs between projects and entity kinds.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Run one full sync pass.
    ///
    /// Failures inside the run end up in the returned summary with outcome
    /// `Failed`; `Err` means the run never started.
    pub async fn run_sync(&self, trigger: RunTrigger) -> Result<RunSummary, AppError> {
        let _guard = RunGuard::acquire(&self.running).ok_or(AppError::RunInProgress)?;

        let run_id = Uuid::new_v4().to_string();
        let started_at = now();
        let start = Instant::now();
        self.status.write().await.state = RunState::Running;
        log::info!("[sync] Run {} started ({} trigger)", run_id, trigger);

        let mut progress = RunProgress::default();
        if let Err(e) = self.sync_all_projects(&mut progress).await {
            progress.fatal = Some(e);
        }

        let outcome = match &progress.fatal {
            Some(_) => RunOutcome::Failed,
            None if self.shutdown.is_cancelled() => RunOutcome::Cancelled,
            None if !progress.failed.is_empty() => RunOutcome::Partial,
            None => RunOutcome::Succeeded,
        };

        let summary = RunSummary {
            run_id,
            trigger,
            outcome,
            started_at,
            finished_at: now(),
            elapsed_ms: start.elapsed().as_millis() as i64,
            projects_listed: progress.listed,
            projects_processed: progress.processed,
            failed_projects: progress.failed,
            synced: progress.synced,
            store_totals: self.store_totals().await,
            error: progress.fatal.as_ref().map(|e| e.to_string()),
        };

        match (&progress.fatal, outcome) {
            (Some(err), _) => log::error!(
                "[sync] Run {} failed after {:.1}s: {}",
                summary.run_id,
                summary.elapsed_ms as f64 / 1000.0,
                err
            ),
            (None, RunOutcome::Cancelled) => log::warn!(
                "[sync] Run {} cancelled after {} project(s)",
                summary.run_id,
                summary.projects_processed
            ),
            _ => log::info!(
                "[sync] Run {} {} in {:.1}s: {}/{} projects, {} failed",
                summary.run_id,
                outcome,
                summary.elapsed_ms as f64 / 1000.0,
                summary.projects_processed,
                summary.projects_listed,
                summary.failed_projects.len()
            ),
        }
        log::info!("[sync] Store totals: {}", summary.store_totals);

        if let Some(pool) = &self.history {
            if let Err(e) = sync_run::record_run(pool, &summary, MAX_RUN_HISTORY).await {
                log::warn!("[sync] Failed to record run {}: {}", summary.run_id, e);
            }
        }

        {
            let mut status = self.status.write().await;
            status.state = if outcome == RunOutcome::Failed {
                RunState::Failed
            } else {
                RunState::Idle
            };
            status.last_run = Some(summary.clone());
        }

        Ok(summary)
    }

    /// List projects and sync each one through the bounded worker pool.
    async fn sync_all_projects(&self, progress: &mut RunProgress) -> Result<(), AppError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        let mut projects = entity_sync::list_projects(self.source.as_ref()).await?;
        if !self.config.selection.is_empty() {
            let found = projects.len();
            projects.retain(|p| self.config.selection.matches(&p.path_with_namespace));
            log::info!(
                "[sync] {} of {} project(s) match the project selection",
                projects.len(),
                found
            );
        }
        progress.listed = projects.len();
        log::info!("[sync] Found {} project(s)", projects.len());

        // Stops workers at their next checkpoint on shutdown or on an aborting failure.
        let halt = self.shutdown.child_token();
        let delay = self.config.project_delay;
        let halt_ref = &halt;

        let mut passes = stream::iter(projects.into_iter().enumerate())
            .map(|(index, project)| async move {
                if index > 0 && !delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = halt_ref.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                self.sync_one_project(project, halt_ref).await
            })
            .buffer_unordered(self.config.max_concurrent_projects.max(1));

        while let Some(pass) = passes.next().await {
            progress.synced.merge(&pass.counts);
            match pass.result {
                Ok(()) => progress.processed += 1,
                Err(AppError::Cancelled) => {}
                Err(err) => {
                    log::error!(
                        "[sync] Project {} ({}) failed: {}",
                        pass.project.path_with_namespace,
                        pass.project.id,
                        err
                    );
                    match self.config.failure_policy {
                        FailurePolicy::AbortRun => {
                            if progress.fatal.is_none() {
                                progress.fatal = Some(err);
                            }
                            halt.cancel();
                        }
                        FailurePolicy::IsolateProject => progress.failed.push(FailedProject {
                            project_id: pass.project.id,
                            path_with_namespace: pass.project.path_with_namespace.clone(),
                            error: err.to_string(),
                        }),
                    }
                }
            }
        }

        Ok(())
    }

    /// Project record, then members, commits, merge requests and issues.
    async fn sync_one_project(&self, project: GitLabProject, halt: &CancellationToken) -> ProjectPass {
        let mut counts = KindCounts::default();
        let result = self.sync_project_kinds(&project, halt, &mut counts).await;

        if result.is_ok() {
            log::info!(
                "[sync] {}: members={} commits={} merge_requests={} issues={}",
                project.path_with_namespace,
                counts.members,
                counts.commits,
                counts.merge_requests,
                counts.issues
            );
        }

        ProjectPass {
            project,
            counts,
            result,
        }
    }

    async fn sync_project_kinds(
        &self,
        project: &GitLabProject,
        halt: &CancellationToken,
        counts: &mut KindCounts,
    ) -> Result<(), AppError> {
        let source = self.source.as_ref();
        let writer = self.writer.as_ref();
        let id = project.id;

        checkpoint(halt)?;
        log::debug!("[sync] Syncing project {} ({})", project.path_with_namespace, id);
        let n = entity_sync::sync_project(writer, project).await?;
        counts.add(EntityKind::Project, n as i64);

        checkpoint(halt)?;
        let n = entity_sync::sync_entity::<MemberSyncer>(source, writer, id).await?;
        counts.add(EntityKind::Member, n as i64);

        checkpoint(halt)?;
        let n = entity_sync::sync_entity::<CommitSyncer>(source, writer, id).await?;
        counts.add(EntityKind::Commit, n as i64);

        checkpoint(halt)?;
        let n = entity_sync::sync_entity::<MergeRequestSyncer>(source, writer, id).await?;
        counts.add(EntityKind::MergeRequest, n as i64);

        checkpoint(halt)?;
        let n = entity_sync::sync_entity::<IssueSyncer>(source, writer, id).await?;
        counts.add(EntityKind::Issue, n as i64);

        Ok(())
    }

    /// Post-hoc whole-store counts; a failing count is logged and left at 0.
    async fn store_totals(&self) -> KindCounts {
        let mut totals = KindCounts::default();
        for kind in EntityKind::ALL {
            match self.writer.count(kind).await {
                Ok(n) => totals.add(kind, n),
                Err(e) => log::warn!("[sync] Failed to count {}: {}", kind, e),
            }
        }
        totals
    }
}

fn checkpoint(halt: &CancellationToken) -> Result<(), AppError> {
    if halt.is_cancelled() {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NaturalKey;
    use crate::services::paginator::testing::ScriptedSource;
    use crate::services::paginator::Listing;
    use crate::services::upsert::{MemoryStore, UpsertBatch};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    fn project(id: i64) -> Value {
        json!({
            "id": id,
            "name": format!("p{}", id),
            "path_with_namespace": format!("course/p{}", id),
            "web_url": format!("https://gitlab.test/course/p{}", id)
        })
    }

    fn member(id: i64) -> Value {
        json!({"id": id, "username": format!("u{}", id), "name": format!("User {}", id), "access_level": 30})
    }

    fn commit(sha: &str) -> Value {
        json!({"id": sha, "short_id": sha, "stats": {"additions": 2, "deletions": 1, "total": 3}})
    }

    fn mr(iid: i64) -> Value {
        json!({"iid": iid, "title": "MR", "state": "opened", "source_branch": "f", "target_branch": "main"})
    }

    fn issue(iid: i64) -> Value {
        json!({"iid": iid, "title": "Issue", "state": "opened", "labels": ["bug"]})
    }

    /// Projects 1..=n, each with one of everything except members on project 1.
    fn remote(n: i64) -> ScriptedSource {
        let mut source =
            ScriptedSource::new().with_pages("/projects", vec![(1..=n).map(project).collect()]);
        for id in 1..=n {
            if id != 1 {
                source = source.with_pages(&format!("/projects/{}/members/all", id), vec![vec![member(id)]]);
            }
            source = source
                .with_pages(
                    &format!("/projects/{}/repository/commits", id),
                    vec![vec![commit(&format!("sha-{}", id))]],
                )
                .with_pages(&format!("/projects/{}/merge_requests", id), vec![vec![mr(1), mr(2)]])
                .with_pages(&format!("/projects/{}/issues", id), vec![vec![issue(1)]]);
        }
        source
    }

    fn engine(source: Arc<dyn PageSource>, store: Arc<MemoryStore>, config: SyncConfig) -> SyncEngine {
        SyncEngine::new(source, store, config)
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.max_concurrent_projects, 1);
        assert_eq!(config.failure_policy, FailurePolicy::AbortRun);
        assert_eq!(
            serde_json::to_string(&FailurePolicy::IsolateProject).unwrap(),
            "\"isolate_project\""
        );
    }

    #[tokio::test]
    async fn test_full_run_in_fixed_order() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(Arc::new(remote(2)), store.clone(), SyncConfig::default());

        let summary = engine.run_sync(RunTrigger::Manual).await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Succeeded);
        assert_eq!(summary.projects_listed, 2);
        assert_eq!(summary.projects_processed, 2);
        assert_eq!(summary.synced.members, 1);
        assert_eq!(summary.synced.merge_requests, 4);
        assert_eq!(summary.store_totals.projects, 2);
        assert_eq!(summary.store_totals.commits, 2);
        assert!(summary.error.is_none());

        // Project 1 has no members, so no member batch for it.
        let kinds: Vec<EntityKind> = store.batch_log().into_iter().map(|(k, _)| k).collect();
        use EntityKind::*;
        assert_eq!(
            kinds,
            vec![Project, Commit, MergeRequest, Issue, Project, Member, Commit, MergeRequest, Issue]
        );
        assert_eq!(engine.status().await.state, RunState::Idle);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(Arc::new(remote(3)), store.clone(), SyncConfig::default());

        let first = engine.run_sync(RunTrigger::Manual).await.unwrap();
        let second = engine.run_sync(RunTrigger::Cadence).await.unwrap();

        assert_eq!(first.store_totals, second.store_totals);
        assert_eq!(second.store_totals.issues, 3);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_run() {
        let source = Arc::new(remote(3).with_failure("/projects/2/repository/commits", 500));
        let store = Arc::new(MemoryStore::new());
        let engine = engine(source.clone(), store.clone(), SyncConfig::default());

        let summary = engine.run_sync(RunTrigger::Cadence).await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Failed);
        assert_eq!(summary.projects_processed, 1);
        assert!(summary.error.as_deref().unwrap().contains("500"));
        assert_eq!(engine.status().await.state, RunState::Failed);

        // Project 1 fully written.
        assert_eq!(store.records_for_project(EntityKind::Issue, 1).len(), 1);
        // Project 2 stopped at commits; later kinds never requested.
        assert_eq!(store.records_for_project(EntityKind::Member, 2).len(), 1);
        assert!(store.records_for_project(EntityKind::MergeRequest, 2).is_empty());
        assert!(store.records_for_project(EntityKind::Issue, 2).is_empty());
        assert_eq!(source.calls_to("/projects/2/merge_requests"), 0);
        assert_eq!(source.calls_to("/projects/2/issues"), 0);
        // Project 3 skipped.
        assert!(store.get(EntityKind::Project, &NaturalKey::Project(3)).is_none());

        // Failure is not sticky.
        source.set_pages("/projects/2/repository/commits", vec![vec![commit("sha-2")]]);
        let retry = engine.run_sync(RunTrigger::Cadence).await.unwrap();
        assert_eq!(retry.outcome, RunOutcome::Succeeded);
        assert_eq!(engine.status().await.state, RunState::Idle);
    }

    #[tokio::test]
    async fn test_isolate_policy_continues_past_failure() {
        let source = Arc::new(remote(3).with_failure("/projects/2/repository/commits", 500));
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            failure_policy: FailurePolicy::IsolateProject,
            ..Default::default()
        };
        let engine = engine(source, store.clone(), config);

        let summary = engine.run_sync(RunTrigger::Manual).await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Partial);
        assert_eq!(summary.projects_processed, 2);
        assert_eq!(summary.failed_projects.len(), 1);
        assert_eq!(summary.failed_projects[0].project_id, 2);
        assert_eq!(summary.failed_projects[0].path_with_namespace, "course/p2");
        assert!((summary.success_rate().unwrap() - 66.666).abs() < 0.01);
        assert_eq!(store.records_for_project(EntityKind::Issue, 3).len(), 1);
        assert_eq!(engine.status().await.state, RunState::Idle);
    }

    #[tokio::test]
    async fn test_project_listing_failure_is_fatal_under_any_policy() {
        let source = Arc::new(ScriptedSource::new().with_failure("/projects", 503));
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            failure_policy: FailurePolicy::IsolateProject,
            ..Default::default()
        };
        let summary = engine(source, store.clone(), config)
            .run_sync(RunTrigger::Manual)
            .await
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Failed);
        assert_eq!(summary.projects_listed, 0);
        assert!(store.batch_log().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_workers_sync_every_project() {
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            max_concurrent_projects: 4,
            ..Default::default()
        };
        let summary = engine(Arc::new(remote(6)), store.clone(), config)
            .run_sync(RunTrigger::Manual)
            .await
            .unwrap();

        assert_eq!(summary.projects_processed, 6);
        assert_eq!(summary.store_totals.merge_requests, 12);
        for id in 1..=6 {
            assert_eq!(
                store.records_for_project(EntityKind::Issue, id).len(),
                1,
                "project {} missing issues",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_project_delay_paces_projects() {
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            project_delay: Duration::from_millis(40),
            ..Default::default()
        };
        let started = Instant::now();

        let summary = engine(Arc::new(remote(3)), store, config)
            .run_sync(RunTrigger::Manual)
            .await
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Succeeded);
        assert_eq!(summary.projects_processed, 3);
        // No pause before the first project, one before each of the others.
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_abort_skips_pending_project_delays() {
        let source = Arc::new(remote(6).with_failure("/projects/1/members/all", 500));
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            project_delay: Duration::from_millis(300),
            ..Default::default()
        };
        let started = Instant::now();

        let summary = engine(source.clone(), store, config)
            .run_sync(RunTrigger::Manual)
            .await
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Failed);
        assert_eq!(summary.projects_processed, 0);
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(source.calls_to("/projects/2/members/all"), 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_project_delay() {
        let token = CancellationToken::new();
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            project_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let engine = engine(Arc::new(remote(3)), store, config).with_shutdown(token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let summary = tokio::time::timeout(Duration::from_secs(2), engine.run_sync(RunTrigger::Manual))
            .await
            .expect("run kept waiting after shutdown")
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(summary.projects_processed, 1);
    }

    #[tokio::test]
    async fn test_project_filter_skips_unmatched_projects() {
        let source = Arc::new(remote(3));
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            selection: ProjectSelection {
                filter: Some("p2".to_string()),
                paths: Vec::new(),
            },
            ..Default::default()
        };

        let summary = engine(source.clone(), store.clone(), config)
            .run_sync(RunTrigger::Manual)
            .await
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Succeeded);
        assert_eq!(summary.projects_listed, 1);
        assert_eq!(summary.store_totals.projects, 1);
        for id in [1, 3] {
            assert_eq!(source.calls_to(&format!("/projects/{}/members/all", id)), 0);
            assert_eq!(source.calls_to(&format!("/projects/{}/issues", id)), 0);
        }
        assert_eq!(store.records_for_project(EntityKind::Issue, 2).len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_project_paths() {
        let source = Arc::new(remote(3));
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            selection: ProjectSelection {
                filter: None,
                paths: vec!["course/p1".to_string(), "course/p3".to_string()],
            },
            ..Default::default()
        };

        let summary = engine(source.clone(), store, config)
            .run_sync(RunTrigger::Manual)
            .await
            .unwrap();

        assert_eq!(summary.projects_listed, 2);
        assert_eq!(summary.projects_processed, 2);
        assert_eq!(source.calls_to("/projects/2/repository/commits"), 0);
    }

    #[test]
    fn test_selection_rules_combine() {
        let selection = ProjectSelection {
            filter: Some("course/".to_string()),
            paths: vec!["course/a".to_string(), "other/b".to_string()],
        };
        assert!(selection.matches("course/a"));
        assert!(!selection.matches("other/b"));
        assert!(!selection.matches("course/c"));
        assert!(ProjectSelection::default().matches("anything/at-all"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        token.cancel();
        let engine = engine(Arc::new(remote(2)), store.clone(), SyncConfig::default())
            .with_shutdown(token);

        let summary = engine.run_sync(RunTrigger::Startup).await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(summary.projects_processed, 0);
        assert!(store.batch_log().is_empty());
    }

    /// Cancels the shutdown token once the first issue batch is written.
    struct CancelAfterIssues {
        inner: MemoryStore,
        token: CancellationToken,
    }

    #[async_trait]
    impl UpsertWriter for CancelAfterIssues {
        async fn upsert(&self, batch: UpsertBatch) -> Result<u64, AppError> {
            let is_issues = batch.kind() == EntityKind::Issue;
            let written = self.inner.upsert(batch).await?;
            if is_issues {
                self.token.cancel();
            }
            Ok(written)
        }

        async fn count(&self, kind: EntityKind) -> Result<i64, AppError> {
            self.inner.count(kind).await
        }
    }

    #[tokio::test]
    async fn test_cancellation_drains_between_projects() {
        let token = CancellationToken::new();
        let store = Arc::new(CancelAfterIssues {
            inner: MemoryStore::new(),
            token: token.clone(),
        });
        let engine = SyncEngine::new(Arc::new(remote(3)), store.clone(), SyncConfig::default())
            .with_shutdown(token);

        let summary = engine.run_sync(RunTrigger::Cadence).await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(summary.projects_processed, 1);
        assert_eq!(store.inner.count(EntityKind::Project).await.unwrap(), 1);
    }

    /// Holds the first page request until released.
    struct GatedSource {
        inner: ScriptedSource,
        gate: Notify,
    }

    #[async_trait]
    impl PageSource for GatedSource {
        async fn fetch_page(
            &self,
            listing: &Listing,
            page: u32,
            per_page: u32,
        ) -> Result<Vec<Value>, AppError> {
            if listing.path == "/projects" && page == 1 {
                self.gate.notified().await;
            }
            self.inner.fetch_page(listing, page, per_page).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_rejected() {
        let source = Arc::new(GatedSource {
            inner: remote(1),
            gate: Notify::new(),
        });
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(SyncEngine::new(source.clone(), store, SyncConfig::default()));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_sync(RunTrigger::Cadence).await })
        };
        while !engine.is_running() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(engine.status().await.state, RunState::Running);

        let second = engine.run_sync(RunTrigger::Manual).await;
        assert!(matches!(second, Err(AppError::RunInProgress)));

        source.gate.notify_one();
        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.outcome, RunOutcome::Succeeded);
        assert!(!engine.is_running());
    }
}
