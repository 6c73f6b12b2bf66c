//! Handlers: the caller-supplied code that runs a job.
//!
//! Two layers:
//! - **JobHandler** (object-safe): receives a [`JobRef`], used by the registry
//! - **Handler<T>** (typed): receives a decoded [`Task`]; wrapped into a
//!   `JobHandler` by [`TypedHandler`]
//!
//! Plain async closures become handlers through [`FnHandler`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::codec::{CodecError, PayloadCodec};
use super::task::Task;
use crate::domain::{JobId, JobRecord};

/// Handle given to a handler for one execution attempt.
pub struct JobRef {
    id: JobId,
    name: String,
    retry_count: u32,
    args: Vec<u8>,
    codec: Arc<dyn PayloadCodec>,
}

impl JobRef {
    pub(crate) fn new(job: &JobRecord, codec: Arc<dyn PayloadCodec>) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            retry_count: job.retry_count,
            args: job.args.clone(),
            codec,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Failed attempts so far (0 on the first run).
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Decode the job's arguments.
    pub fn scan_args<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        self.codec.decode(&self.args)
    }
}

impl std::fmt::Debug for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: JobRef) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobRef) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, job: JobRef) -> anyhow::Result<()> {
        (self.0)(job).await
    }
}

/// Typed handler for one [`Task`].
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> anyhow::Result<()>;
}

/// Decodes the arguments into `T` and forwards to the typed handler.
pub struct TypedHandler<T, H> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> JobHandler for TypedHandler<T, H> {
    async fn handle(&self, job: JobRef) -> anyhow::Result<()> {
        let task: T = job.scan_args()?;
        self.handler.handle(task).await
    }
}
