//! Idempotent write adapter shared by every entity syncer.
//!
//! A writer inserts a record whose natural key is absent and fully overwrites
//! the stored fields when it is present. Writing the same batch twice leaves
//! the store unchanged.

use crate::error::AppError;
use crate::models::{
    Commit, EntityKind, Issue, Member, MergeRequest, Mirrored, NaturalKey, Project,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Records of a single entity kind, written in one round trip.
#[derive(Debug, Clone)]
pub enum UpsertBatch {
    Projects(Vec<Project>),
    Members(Vec<Member>),
    Commits(Vec<Commit>),
    MergeRequests(Vec<MergeRequest>),
    Issues(Vec<Issue>),
}

impl UpsertBatch {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Projects(_) => EntityKind::Project,
            Self::Members(_) => EntityKind::Member,
            Self::Commits(_) => EntityKind::Commit,
            Self::MergeRequests(_) => EntityKind::MergeRequest,
            Self::Issues(_) => EntityKind::Issue,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Projects(v) => v.len(),
            Self::Members(v) => v.len(),
            Self::Commits(v) => v.len(),
            Self::MergeRequests(v) => v.len(),
            Self::Issues(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Each record as JSON, paired with its natural key.
    pub fn keyed_values(&self) -> Result<Vec<(NaturalKey, Value)>, AppError> {
        fn keyed<T: Mirrored>(records: &[T]) -> Result<Vec<(NaturalKey, Value)>, AppError> {
            records
                .iter()
                .map(|r| Ok((r.natural_key(), serde_json::to_value(r)?)))
                .collect()
        }

        match self {
            Self::Projects(v) => keyed(v),
            Self::Members(v) => keyed(v),
            Self::Commits(v) => keyed(v),
            Self::MergeRequests(v) => keyed(v),
            Self::Issues(v) => keyed(v),
        }
    }
}

/// Store client used by the sync engine.
#[async_trait]
pub trait UpsertWriter: Send + Sync {
    /// Insert-or-overwrite every record in `batch`; returns the records written.
    async fn upsert(&self, batch: UpsertBatch) -> Result<u64, AppError>;

    /// Whole-store record count for `kind`.
    async fn count(&self, kind: EntityKind) -> Result<i64, AppError>;
}

/// In-process writer; backs `sync --dry-run` and engine tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<(EntityKind, NaturalKey), Value>>,
    batches: Mutex<Vec<(EntityKind, usize)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: EntityKind, key: &NaturalKey) -> Option<Value> {
        lock(&self.records).get(&(kind, key.clone())).cloned()
    }

    /// Stored records of `kind` belonging to `project_id`.
    pub fn records_for_project(&self, kind: EntityKind, project_id: i64) -> Vec<Value> {
        lock(&self.records)
            .iter()
            .filter(|((k, key), _)| *k == kind && key.project_id() == project_id)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Number of `upsert` calls received for `kind`.
    pub fn batches_for(&self, kind: EntityKind) -> usize {
        lock(&self.batches).iter().filter(|(k, _)| *k == kind).count()
    }

    /// Upsert calls in arrival order, as (kind, batch size).
    pub fn batch_log(&self) -> Vec<(EntityKind, usize)> {
        lock(&self.batches).clone()
    }
}

#[async_trait]
impl UpsertWriter for MemoryStore {
    async fn upsert(&self, batch: UpsertBatch) -> Result<u64, AppError> {
        let kind = batch.kind();
        let keyed = batch.keyed_values()?;
        let written = keyed.len();

        let mut records = lock(&self.records);
        for (key, value) in keyed {
            records.insert((kind, key), value);
        }
        lock(&self.batches).push((kind, written));

        Ok(written as u64)
    }

    async fn count(&self, kind: EntityKind) -> Result<i64, AppError> {
        Ok(lock(&self.records).keys().filter(|(k, _)| *k == kind).count() as i64)
    }
}
