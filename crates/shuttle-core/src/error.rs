//! ShuttleError - errors surfaced to engine callers.
//!
//! Execution-time failures inside background workers never reach this type;
//! they are recorded on the job and retried. Only enqueue, explicit calls
//! and construction report errors.

use crate::domain::{JobId, JobStatus};
use crate::ports::StoreError;
use crate::typed::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum ShuttleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A handler returned an error or panicked (only from `execute_one_job`).
    #[error("job {job_id} ({name}) failed: {message}")]
    Handler {
        job_id: JobId,
        name: String,
        message: String,
    },

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("missing handlers: {0:?}. These jobs were expected but no handler is registered.")]
    MissingHandlers(Vec<String>),

    #[error("named job {0:?} not found")]
    NamedJobNotFound(String),
}

pub type Result<T, E = ShuttleError> = std::result::Result<T, E>;
