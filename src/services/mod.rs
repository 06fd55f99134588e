//! Sync services.
//!
//! Leaf-first: the GitLab page source, the paginator, the upsert writer
//! abstraction, per-kind entity syncers, the orchestrating engine and the
//! daily scheduler.

pub mod entity_sync;
pub mod gitlab_client;
pub mod paginator;
pub mod scheduler;
pub mod sync_engine;
pub mod upsert;

pub use gitlab_client::GitLabClient;
pub use paginator::{Listing, PageSource, Paginator};
pub use scheduler::{DailyCadence, SchedulerHandle};
pub use sync_engine::{FailurePolicy, ProjectSelection, SyncConfig, SyncEngine};
pub use upsert::{MemoryStore, UpsertBatch, UpsertWriter};
