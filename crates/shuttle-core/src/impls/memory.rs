//! In-memory job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{JobCounts, JobId, JobRecord, JobStatus};
use crate::ports::{JobStore, StoreError};

/// Job store that keeps every record in a single locked `Vec`.
///
/// Every operation takes the lock once, so a claim (find + mark running) is
/// atomic with respect to other workers.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<Vec<JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<T>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut JobRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(StoreError::NotFound(id))?;
        Ok(f(job))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_or_upsert(&self, job: JobRecord) -> Result<JobId, StoreError> {
        let mut jobs = self.jobs.lock().await;

        if let Some(identifier) = job.named_job.as_deref()
            && let Some(existing) = jobs
                .iter_mut()
                .find(|x| x.named_job.as_deref() == Some(identifier))
        {
            debug!(target: "store", job_id = %existing.id, identifier, "updating named job");
            existing.apply_upsert(&job);
            return Ok(existing.id);
        }

        let id = job.id;
        jobs.push(job);
        Ok(id)
    }

    async fn claim(
        &self,
        names: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let next = jobs
            .iter_mut()
            .filter(|job| job.is_eligible(now) && names.contains(&job.name))
            .min_by_key(|job| job.claim_order());

        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.clone()
        }))
    }

    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
        self.update(id, |job| job.status = status).await
    }

    async fn inc_retry_count(&self, id: JobId) -> Result<u32, StoreError> {
        self.update(id, |job| {
            job.retry_count += 1;
            job.retry_count
        })
        .await
    }

    async fn set_error(
        &self,
        id: JobId,
        error: Option<&str>,
        trace: Option<&str>,
    ) -> Result<(), StoreError> {
        self.update(id, |job| {
            job.error = error.map(str::to_string);
            job.error_trace = trace.map(str::to_string);
        })
        .await
    }

    async fn set_finished_at(&self, id: JobId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(id, |job| job.finished_at = Some(at)).await
    }

    async fn set_next_run(&self, id: JobId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(id, |job| job.next_run = Some(at)).await
    }

    async fn pending(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut pending: Vec<JobRecord> = jobs
            .iter()
            .filter(|job| job.is_eligible(now))
            .cloned()
            .collect();
        pending.sort_by_key(|job| job.claim_order());
        Ok(pending)
    }

    async fn clean_up(
        &self,
        cutoff: DateTime<Utc>,
        include_failed: bool,
    ) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|job| !job.is_expired(cutoff, include_failed));
        Ok((before - jobs.len()) as u64)
    }

    async fn named_job(&self, identifier: &str) -> Result<Option<JobRecord>, StoreError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .iter()
            .find(|job| job.named_job.as_deref() == Some(identifier))
            .cloned())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.iter().find(|job| job.id == id).cloned())
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut counts = JobCounts::default();
        for job in jobs.iter() {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }
}
