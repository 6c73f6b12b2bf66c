//! Job status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job record.
///
/// State transitions:
/// - Pending -> Running (claim)
/// - Running -> Done (success, not repeating)
/// - Running -> Pending (success, repeating; rescheduled)
/// - Running -> Retry (failure, retry budget remains)
/// - Running -> Failed (failure, retry budget exhausted)
/// - Retry -> Running (claim)
///
/// The integer codes are what storage backends persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not yet run (or rescheduled); eligible to run.
    Pending,

    /// Claimed by a worker.
    Running,

    /// Finished successfully. Terminal.
    Done,

    /// Failed, but has retry budget left.
    Retry,

    /// Exceeded the retry budget. Terminal.
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Retry,
        JobStatus::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Can a worker claim a job in this state?
    ///
    /// `Pending` repeating jobs additionally need their next run time to
    /// have elapsed; see [`crate::domain::JobRecord::is_eligible`].
    pub fn is_claimable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retry)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Retry, Running)
                | (Running, Done)
                | (Running, Pending)
                | (Running, Retry)
                | (Running, Failed)
        )
    }

    pub fn code(self) -> i64 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Done => 2,
            JobStatus::Retry => 3,
            JobStatus::Failed => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(JobStatus::Pending),
            1 => Some(JobStatus::Running),
            2 => Some(JobStatus::Done),
            3 => Some(JobStatus::Retry),
            4 => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Retry => "retry",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
