//! Domain model (ids, job record, status state machine).

pub mod ids;
pub mod job;
pub mod status;

pub use ids::{JobId, ParseJobIdError};
pub use job::{CleanUpConfig, JobConfig, JobCounts, JobInfo, JobRecord, add_interval, sub_interval};
pub use status::JobStatus;
