//! Job identifiers.
//!
//! Ids are ULIDs: sortable by creation time and safe to generate on several
//! nodes without coordination. They render with a `job-` prefix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

const PREFIX: &str = "job-";

/// Identifier of a job record.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Ulid);

impl JobId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

/// Error returned when a string is not a valid job id.
#[derive(Debug, thiserror::Error)]
#[error("invalid job id {input:?}: {source}")]
pub struct ParseJobIdError {
    input: String,
    #[source]
    source: ulid::DecodeError,
}

impl FromStr for JobId {
    type Err = ParseJobIdError;

    /// Accepts both the prefixed form (`job-01H...`) and a bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|source| ParseJobIdError {
                input: s.to_string(),
                source,
            })
    }
}
