//! Dispatcher - claim one job, run its handler, record the outcome.
//!
//! Shared by the [`Engine`](super::Engine) and every
//! [`BackgroundWorker`](super::BackgroundWorker). Workers only hold the
//! dispatcher, never the engine, so dropping the engine does not wait on
//! its own workers.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tracing::{debug, error, trace, warn};

use super::config::EngineConfig;
use crate::domain::{JobId, JobRecord, JobStatus, add_interval};
use crate::error::{Result, ShuttleError};
use crate::ports::{Clock, IdGenerator, JobStore};
use crate::typed::{HandlerRegistry, JobRef, PayloadCodec};

pub(crate) struct Dispatcher {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) registry: RwLock<HandlerRegistry>,
    pub(crate) codec: Arc<dyn PayloadCodec>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Box<dyn IdGenerator>,
    pub(crate) config: EngineConfig,
}

/// Why one handler run did not succeed.
struct HandlerFailure {
    message: String,
    trace: String,
}

/// Store errors hit while recording one outcome.
///
/// Every step is still attempted so the job always leaves `Running`; the
/// first error is reported once the status has been written.
struct Bookkeeping {
    job_id: JobId,
    first_error: Option<ShuttleError>,
}

impl Bookkeeping {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            first_error: None,
        }
    }

    fn check<T, E: Into<ShuttleError>>(
        &mut self,
        step: &'static str,
        result: std::result::Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                let err = err.into();
                error!(
                    target: "engine",
                    job_id = %self.job_id,
                    step,
                    error = %err,
                    "recording job outcome failed"
                );
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                }
                None
            }
        }
    }

    fn finish(self) -> Result<()> {
        self.first_error.map_or(Ok(()), Err)
    }
}

impl Dispatcher {
    // The registry lock is never held across an await, so a poisoned lock
    // still holds a consistent map.
    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, HandlerRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registry_mut(&self) -> RwLockWriteGuard<'_, HandlerRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim and run one job.
    ///
    /// `Ok(None)` when nothing is eligible. A handler failure is recorded on
    /// the job first and then returned as [`ShuttleError::Handler`]. A store
    /// error while recording the outcome is returned after the status write.
    pub(crate) async fn execute_one(&self) -> Result<Option<JobId>> {
        let names = self.registry().names();
        let Some(job) = self.store.claim(&names, self.clock.now()).await? else {
            trace!(target: "engine", "no eligible job");
            return Ok(None);
        };
        debug!(
            target: "engine",
            job_id = %job.id,
            job_name = %job.name,
            retry_count = job.retry_count,
            "claimed job"
        );

        let outcome = self.run_handler(&job).await;

        let mut book = Bookkeeping::new(job.id);
        let finished_at = self.clock.now();
        book.check(
            "set finished_at",
            self.store.set_finished_at(job.id, finished_at).await,
        );
        // a named enqueue may have changed repeat or retry settings mid-run
        let current = book
            .check("reload job", self.store.get(job.id).await)
            .flatten()
            .unwrap_or_else(|| job.clone());

        match outcome {
            Ok(()) => {
                self.complete(&current, finished_at, &mut book).await;
                book.finish()?;
                Ok(Some(job.id))
            }
            Err(failure) => {
                self.fail(&current, &failure, &mut book).await;
                book.finish()?;
                Err(ShuttleError::Handler {
                    job_id: job.id,
                    name: job.name,
                    message: failure.message,
                })
            }
        }
    }

    /// One poll of a background worker. Nobody waits on the result, so
    /// errors are logged and dropped.
    pub(crate) async fn background_execute(&self, worker_id: usize) {
        match self.execute_one().await {
            Ok(_) => {}
            // already recorded and logged by `fail`
            Err(ShuttleError::Handler { .. }) => {}
            Err(err) => {
                error!(target: "engine", worker_id, error = %err, "background dispatch failed");
            }
        }
    }

    async fn run_handler(&self, job: &JobRecord) -> Result<(), HandlerFailure> {
        let handler = self.registry().get(&job.name);
        let Some(handler) = handler else {
            return Err(HandlerFailure {
                message: format!("no handler registered for {:?}", job.name),
                trace: Backtrace::force_capture().to_string(),
            });
        };

        let job_ref = JobRef::new(job, Arc::clone(&self.codec));
        match AssertUnwindSafe(handler.handle(job_ref)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                let trace = match err.backtrace().status() {
                    BacktraceStatus::Captured => err.backtrace().to_string(),
                    _ => Backtrace::force_capture().to_string(),
                };
                Err(HandlerFailure {
                    message: format!("{err:#}"),
                    trace,
                })
            }
            Err(panic) => Err(HandlerFailure {
                message: panic_message(panic.as_ref()),
                trace: Backtrace::force_capture().to_string(),
            }),
        }
    }

    async fn complete(&self, job: &JobRecord, finished_at: DateTime<Utc>, book: &mut Bookkeeping) {
        book.check("clear error", self.store.set_error(job.id, None, None).await);
        if job.repeat {
            let next_run = add_interval(finished_at, job.repeat_interval);
            book.check("set next_run", self.store.set_next_run(job.id, next_run).await);
            book.check("set status", self.transition(job, JobStatus::Pending).await);
            debug!(target: "engine", job_id = %job.id, %next_run, "repeating job rescheduled");
        } else {
            book.check("set status", self.transition(job, JobStatus::Done).await);
            debug!(target: "engine", job_id = %job.id, "job done");
        }
    }

    async fn fail(&self, job: &JobRecord, failure: &HandlerFailure, book: &mut Bookkeeping) {
        book.check(
            "record error",
            self.store
                .set_error(job.id, Some(&failure.message), Some(&failure.trace))
                .await,
        );
        let retry_count = book
            .check("increment retry count", self.store.inc_retry_count(job.id).await)
            .unwrap_or_else(|| job.retry_count.saturating_add(1));

        if retry_count > job.max_retry {
            book.check("set status", self.transition(job, JobStatus::Failed).await);
            error!(
                target: "engine",
                job_id = %job.id,
                job_name = %job.name,
                retry_count,
                error = %failure.message,
                "job failed, retries exhausted"
            );
        } else {
            book.check("set status", self.transition(job, JobStatus::Retry).await);
            warn!(
                target: "engine",
                job_id = %job.id,
                job_name = %job.name,
                retry_count,
                max_retry = job.max_retry,
                error = %failure.message,
                "job failed, will retry"
            );
        }
    }

    /// Move a claimed (`Running`) job to `to`.
    async fn transition(&self, job: &JobRecord, to: JobStatus) -> Result<()> {
        let from = JobStatus::Running;
        if !from.can_transition_to(to) {
            return Err(ShuttleError::IllegalTransition { from, to });
        }
        self.store.set_status(job.id, to).await?;
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}
