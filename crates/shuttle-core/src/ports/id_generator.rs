//! IdGenerator port.

use ulid::Ulid;

use crate::domain::JobId;
use crate::ports::Clock;

/// Generates job ids that are unique across processes without coordination.
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// ULID ids whose timestamp part comes from the given clock.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        JobId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
