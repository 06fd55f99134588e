//! Run summaries and the `sync_runs` history table.

use super::KindCounts;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of run summaries kept in `sync_runs`.
pub const MAX_RUN_HISTORY: i64 = 50;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// The daily cadence fired.
    Cadence,
    /// Requested on demand (CLI `sync` or `SchedulerHandle::trigger_sync`).
    Manual,
    /// First run when the daemon starts.
    Startup,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cadence => write!(f, "cadence"),
            Self::Manual => write!(f, "manual"),
            Self::Startup => write!(f, "startup"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// Some projects failed but the run carried on (isolation policy).
    Partial,
    Failed,
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A project whose sync did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedProject {
    pub project_id: i64,
    pub path_with_namespace: String,
    pub error: String,
}

/// Post-run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub trigger: RunTrigger,
    pub outcome: RunOutcome,

    /// Unix timestamps.
    pub started_at: i64,
    pub finished_at: i64,

    pub elapsed_ms: i64,

    /// Projects returned by the project listing.
    pub projects_listed: usize,

    /// Projects whose five entity kinds all completed.
    pub projects_processed: usize,

    pub failed_projects: Vec<FailedProject>,

    /// Records processed by this run, per kind.
    pub synced: KindCounts,

    /// Whole-store totals counted after the run.
    pub store_totals: KindCounts,

    pub error: Option<String>,
}

impl RunSummary {
    /// Percentage of attempted projects that completed, if any were attempted.
    pub fn success_rate(&self) -> Option<f64> {
        let attempted = self.projects_processed + self.failed_projects.len();
        if attempted == 0 {
            return None;
        }
        Some(self.projects_processed as f64 * 100.0 / attempted as f64)
    }
}

/// Store a run summary and prune history to `keep` entries.
pub async fn record_run(
    pool: &sqlx::SqlitePool,
    summary: &RunSummary,
    keep: i64,
) -> Result<(), crate::error::AppError> {
    let json = serde_json::to_string(summary)?;

    sqlx::query(
        r#"
        INSERT INTO sync_runs (
            run_id, trigger_kind, outcome, started_at, finished_at, elapsed_ms,
            projects_processed, projects_failed, error, summary
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&summary.run_id)
    .bind(summary.trigger.to_string())
    .bind(summary.outcome.to_string())
    .bind(summary.started_at)
    .bind(summary.finished_at)
    .bind(summary.elapsed_ms)
    .bind(summary.projects_processed as i64)
    .bind(summary.failed_projects.len() as i64)
    .bind(&summary.error)
    .bind(&json)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        DELETE FROM sync_runs WHERE id NOT IN (
            SELECT id FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?
        )
        "#,
    )
    .bind(keep)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent run summaries, newest first.
pub async fn recent_runs(
    pool: &sqlx::SqlitePool,
    limit: i64,
) -> Result<Vec<RunSummary>, crate::error::AppError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT summary FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(pool)
            .await?;

    let mut summaries = Vec::with_capacity(rows.len());
    for (json,) in rows {
        summaries.push(serde_json::from_str(&json)?);
    }
    Ok(summaries)
}
