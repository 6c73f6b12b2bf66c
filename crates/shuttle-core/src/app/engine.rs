//! Engine - the public surface: register, enqueue, execute, inspect, and
//! manage the worker pool.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, info};

use super::builder::EngineBuilder;
use super::config::EngineConfig;
use super::dispatch::Dispatcher;
use super::worker::BackgroundWorker;
use crate::domain::{
    CleanUpConfig, JobConfig, JobCounts, JobId, JobInfo, JobRecord, sub_interval,
};
use crate::error::{Result, ShuttleError};
use crate::ports::{Clock, IdGenerator, JobStore};
use crate::typed::{
    FnHandler, Handler, HandlerRegistry, JobHandler, JobRef, PayloadCodec, Task, TypedHandler,
};

/// A job engine bound to one store.
///
/// # Example
/// ```ignore
/// let engine = Engine::new(Arc::new(InMemoryJobStore::new()));
/// engine.register_fn("inc", |job: JobRef| async move {
///     let args: IncArgs = job.scan_args()?;
///     COUNTER.fetch_add(args.amount, Ordering::SeqCst);
///     anyhow::Ok(())
/// });
/// engine.enqueue_job("inc", &IncArgs { amount: 1 }, JobConfig::new()).await?;
/// engine.execute_one_job().await?;
/// ```
pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    workers: Mutex<Vec<Arc<BackgroundWorker>>>,
}

impl Engine {
    /// Engine with the default codec, system clock and config.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::builder(store).into_engine()
    }

    pub fn builder(store: Arc<dyn JobStore>) -> EngineBuilder {
        EngineBuilder::new(store)
    }

    pub(crate) fn from_parts(
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry,
        codec: Arc<dyn PayloadCodec>,
        clock: Arc<dyn Clock>,
        ids: Box<dyn IdGenerator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher {
                store,
                registry: RwLock::new(registry),
                codec,
                clock,
                ids,
                config,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    // ---- handlers ----

    /// Register `handler` for jobs named `name`. A second registration for
    /// the same name replaces the first.
    pub fn register_handler(&self, name: impl Into<String>, handler: impl JobHandler + 'static) {
        let name = name.into();
        let replaced = self
            .dispatcher
            .registry_mut()
            .register(name.clone(), Arc::new(handler))
            .is_some();
        info!(target: "engine", job_name = %name, replaced, "handler registered");
    }

    /// Register an async closure as the handler for `name`.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(JobRef) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(name, FnHandler(f));
    }

    /// Register a typed handler under `T::NAME`.
    pub fn register_task<T: Task, H: Handler<T> + 'static>(&self, handler: H) {
        self.register_handler(T::NAME, TypedHandler::<T, H>::new(handler));
    }

    /// Names with a registered handler, sorted.
    pub fn registered_handlers(&self) -> Vec<String> {
        self.dispatcher.registry().names()
    }

    // ---- jobs ----

    /// Encode `args` and store a new `Pending` job (or update the existing
    /// named job when `config.identifier` is set).
    pub async fn enqueue_job<A: Serialize + ?Sized>(
        &self,
        name: &str,
        args: &A,
        config: JobConfig,
    ) -> Result<JobId> {
        let args = self.dispatcher.codec.encode(args)?;
        let job = JobRecord::new(
            self.dispatcher.ids.generate_job_id(),
            name,
            args,
            &config,
            self.dispatcher.clock.now(),
        );
        let id = self.dispatcher.store.create_or_upsert(job).await?;
        debug!(
            target: "engine",
            job_id = %id,
            job_name = name,
            named_job = config.identifier.as_deref(),
            "job enqueued"
        );
        Ok(id)
    }

    pub async fn enqueue_task<T: Task>(&self, task: &T, config: JobConfig) -> Result<JobId> {
        self.enqueue_job(T::NAME, task, config).await
    }

    /// Claim and run one eligible job right now.
    ///
    /// `Ok(None)` if nothing is eligible. A failing handler is recorded on
    /// the job (retry or fail, as a worker would) and also returned as
    /// [`ShuttleError::Handler`].
    pub async fn execute_one_job(&self) -> Result<Option<JobId>> {
        self.dispatcher.execute_one().await
    }

    /// Jobs in `Pending` or `Retry` that are eligible to run now.
    pub async fn pending_jobs(&self) -> Result<Vec<JobRecord>> {
        let now = self.dispatcher.clock.now();
        Ok(self.dispatcher.store.pending(now).await?)
    }

    /// Delete finished jobs older than `config.max_age`. Returns how many
    /// were deleted.
    pub async fn clean_up(&self, config: CleanUpConfig) -> Result<u64> {
        let cutoff = sub_interval(self.dispatcher.clock.now(), config.max_age);
        let deleted = self
            .dispatcher
            .store
            .clean_up(cutoff, config.include_failed)
            .await?;
        info!(
            target: "engine",
            deleted,
            %cutoff,
            include_failed = config.include_failed,
            "cleaned up finished jobs"
        );
        Ok(deleted)
    }

    pub async fn named_job_info(&self, identifier: &str) -> Result<JobInfo> {
        if identifier.is_empty() {
            return Err(ShuttleError::NamedJobNotFound(String::new()));
        }
        self.dispatcher
            .store
            .named_job(identifier)
            .await?
            .and_then(JobInfo::from_record)
            .ok_or_else(|| ShuttleError::NamedJobNotFound(identifier.to_string()))
    }

    pub async fn counts(&self) -> Result<JobCounts> {
        Ok(self.dispatcher.store.counts().await?)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.dispatcher.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.dispatcher.config
    }

    // ---- workers ----

    fn worker_set(&self) -> MutexGuard<'_, Vec<Arc<BackgroundWorker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a stopped worker and add it to this engine's set.
    pub fn new_background_worker(&self) -> Arc<BackgroundWorker> {
        let mut workers = self.worker_set();
        let id = workers.iter().map(|w| w.id() + 1).max().unwrap_or(0);
        let worker = Arc::new(BackgroundWorker::new(id, Arc::clone(&self.dispatcher)));
        workers.push(Arc::clone(&worker));
        worker
    }

    pub fn workers(&self) -> Vec<Arc<BackgroundWorker>> {
        self.worker_set().clone()
    }

    pub fn start_all_workers(&self) {
        for worker in self.workers() {
            worker.start();
        }
    }

    /// Signal every worker to stop without waiting.
    pub fn stop_all_workers(&self) {
        for worker in self.workers() {
            worker.stop();
        }
    }

    pub async fn stop_all_workers_blocking(&self) {
        let workers = self.workers();
        for worker in &workers {
            worker.stop();
        }
        for worker in &workers {
            worker.stop_blocking().await;
        }
    }

    /// Stop every running worker (waiting for each) and empty the set.
    pub async fn destroy_all_workers(&self) {
        let workers = std::mem::take(&mut *self.worker_set());
        for worker in workers.iter().filter(|w| w.is_running()) {
            worker.stop_blocking().await;
        }
        info!(target: "engine", count = workers.len(), "workers destroyed");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // loops exit at their next poll; nothing left to wait on
        for worker in self.worker_set().iter() {
            worker.stop();
        }
    }
}
