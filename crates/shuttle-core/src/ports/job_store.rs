//! JobStore port: the storage contract the engine depends on.
//!
//! Backends own persistence and the atomicity of each operation. The engine
//! owns every lifecycle decision: stores never pick a status on their own,
//! with the single exception of [`JobStore::claim`] which moves the claimed
//! record to `Running`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobCounts, JobId, JobRecord, JobStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("corrupt job row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record. If `job.named_job` is set and a record with that
    /// identifier exists, update it in place instead (see
    /// [`JobRecord::apply_upsert`]). Returns the id of the stored record.
    async fn create_or_upsert(&self, job: JobRecord) -> Result<JobId, StoreError>;

    /// Atomically pick one eligible job whose name is in `names` and mark it
    /// `Running`. Eligible: `Retry`, or `Pending` and either not repeating or
    /// `next_run <= now`. Oldest `finished_at` first (never-run jobs first).
    ///
    /// Two concurrent callers never receive the same record.
    async fn claim(
        &self,
        names: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError>;

    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError>;

    /// Increment the retry count and return the new value.
    async fn inc_retry_count(&self, id: JobId) -> Result<u32, StoreError>;

    /// Record (or, with `None`, clear) the last handler error and its trace.
    async fn set_error(
        &self,
        id: JobId,
        error: Option<&str>,
        trace: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn set_finished_at(&self, id: JobId, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn set_next_run(&self, id: JobId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Jobs a claim at `now` could pick, ignoring handler registration.
    async fn pending(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError>;

    /// Delete `Done` (and with `include_failed`, `Failed`) jobs whose
    /// `finished_at` is before `cutoff`. Returns the number deleted.
    async fn clean_up(
        &self,
        cutoff: DateTime<Utc>,
        include_failed: bool,
    ) -> Result<u64, StoreError>;

    async fn named_job(&self, identifier: &str) -> Result<Option<JobRecord>, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    async fn counts(&self) -> Result<JobCounts, StoreError>;
}
