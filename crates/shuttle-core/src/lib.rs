//! shuttle-core
//!
//! A persistent background-job engine. Callers register handlers by job
//! name, enqueue jobs with arguments, and a pool of background workers
//! claims and runs them, tracking each job through retry and repeat.
//!
//! # Modules
//! - **domain**: ids, job record, status state machine
//! - **ports**: the storage contract (`JobStore`), `Clock`, `IdGenerator`
//! - **typed**: handler traits, typed tasks, payload codec, registry
//! - **app**: engine, builder, dispatcher, background workers
//! - **impls**: in-memory and SQLite job stores
//!
//! # Guarantees
//! - at-least-once: a job is retried until it succeeds or its retry budget
//!   is spent, so handlers must be idempotent
//! - a claim is atomic; two workers never run the same job at once
//! - a handler error or panic never stops a worker

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{BackgroundWorker, Engine, EngineBuilder, EngineConfig};
pub use domain::{
    CleanUpConfig, JobConfig, JobCounts, JobId, JobInfo, JobRecord, JobStatus,
};
pub use error::{Result, ShuttleError};
pub use impls::{InMemoryJobStore, SqliteJobStore};
pub use ports::{Clock, FixedClock, IdGenerator, JobStore, StoreError, SystemClock};
pub use typed::{Handler, JobHandler, JobRef, JsonCodec, PayloadCodec, Task};
