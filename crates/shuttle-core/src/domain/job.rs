//! Job record, per-enqueue configuration, and read-only views.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::status::JobStatus;

/// Per-enqueue configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Number of additional attempts after the first failure.
    pub max_retry: u32,

    /// Reschedule the job after every successful run instead of finishing it.
    pub repeat: bool,

    /// Delay between the end of one run and the next, for repeating jobs.
    pub repeat_interval: Duration,

    /// Named-job key. At most one record per identifier exists in storage;
    /// enqueuing again updates that record.
    pub identifier: Option<String>,
}

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn repeat_every(mut self, interval: Duration) -> Self {
        self.repeat = true;
        self.repeat_interval = interval;
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

/// Cleanup policy for finished jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanUpConfig {
    /// Jobs that finished longer ago than this are deleted.
    pub max_age: Duration,

    /// Also delete `Failed` jobs (otherwise only `Done`).
    pub include_failed: bool,
}

impl CleanUpConfig {
    pub fn older_than(max_age: Duration) -> Self {
        Self {
            max_age,
            include_failed: false,
        }
    }

    pub fn include_failed(mut self) -> Self {
        self.include_failed = true;
        self
    }
}

/// A persisted unit of work.
///
/// This is the single source of truth for a job's lifecycle state. Engine and
/// backends mutate it only through the [`crate::ports::JobStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: JobId,

    /// Handler key.
    pub name: String,

    /// Encoded arguments; the format belongs to the engine's payload codec.
    pub args: Vec<u8>,

    pub status: JobStatus,

    pub retry_count: u32,
    pub max_retry: u32,

    /// Last handler error, if the last attempt failed.
    pub error: Option<String>,
    pub error_trace: Option<String>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub repeat: bool,
    pub repeat_interval: Duration,

    /// Earliest time a repeating job may run again. Ignored when `repeat` is false.
    pub next_run: Option<DateTime<Utc>>,

    pub named_job: Option<String>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        name: impl Into<String>,
        args: Vec<u8>,
        config: &JobConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let next_run = config
            .repeat
            .then(|| add_interval(now, config.repeat_interval));
        Self {
            id,
            name: name.into(),
            args,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retry: config.max_retry,
            error: None,
            error_trace: None,
            created_at: now,
            finished_at: None,
            repeat: config.repeat,
            repeat_interval: config.repeat_interval,
            next_run,
            named_job: config.identifier.clone().filter(|s| !s.is_empty()),
        }
    }

    /// Can a worker claim this job at `now`?
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        if !self.status.is_claimable() {
            return false;
        }
        self.status == JobStatus::Retry
            || !self.repeat
            || self.next_run.is_none_or(|at| at <= now)
    }

    /// Ordering key for claims: oldest finish first, never-run jobs before
    /// any finished one, then creation order.
    pub fn claim_order(&self) -> (Option<DateTime<Utc>>, DateTime<Utc>, JobId) {
        (self.finished_at, self.created_at, self.id)
    }

    /// Is this a finished job that a cleanup with `cutoff` should delete?
    pub fn is_expired(&self, cutoff: DateTime<Utc>, include_failed: bool) -> bool {
        let eligible = match self.status {
            JobStatus::Done => true,
            JobStatus::Failed => include_failed,
            _ => false,
        };
        eligible && self.finished_at.is_some_and(|at| at < cutoff)
    }

    /// Update this named job in place from a newer enqueue.
    ///
    /// A job that already finished (`Done` or `Failed`) is re-armed: back to
    /// `Pending` with a fresh retry budget and no recorded error. Otherwise
    /// status and retry count are left alone. A repeating job is rescheduled
    /// from its last finish (or creation, if it never ran) plus the new
    /// interval.
    pub fn apply_upsert(&mut self, incoming: &JobRecord) {
        if self.status.is_terminal() {
            self.status = JobStatus::Pending;
            self.retry_count = 0;
            self.error = None;
            self.error_trace = None;
        }
        self.name = incoming.name.clone();
        self.args = incoming.args.clone();
        self.max_retry = incoming.max_retry;
        self.repeat = incoming.repeat;
        self.repeat_interval = incoming.repeat_interval;
        if self.repeat {
            let base = self.finished_at.unwrap_or(self.created_at);
            self.next_run = Some(add_interval(base, self.repeat_interval));
        }
    }
}

/// Saturating `DateTime + Duration`.
pub fn add_interval(at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(interval)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Saturating `DateTime - Duration`.
pub fn sub_interval(at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(interval)
        .ok()
        .and_then(|delta| at.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Introspection view of a named job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub identifier: String,
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub repeat: bool,
    pub repeat_interval: Duration,
    pub args: Vec<u8>,
}

impl JobInfo {
    /// Build the view; `None` if the record is not a named job.
    pub fn from_record(record: JobRecord) -> Option<Self> {
        let identifier = record.named_job?;
        Some(Self {
            identifier,
            id: record.id,
            name: record.name,
            status: record.status,
            last_run: record.finished_at,
            next_run: record.next_run,
            repeat: record.repeat,
            repeat_interval: record.repeat_interval,
            args: record.args,
        })
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub retry: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn add(&mut self, status: JobStatus, n: usize) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Running => self.running += n,
            JobStatus::Done => self.done += n,
            JobStatus::Retry => self.retry += n,
            JobStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.done + self.retry + self.failed
    }
}
