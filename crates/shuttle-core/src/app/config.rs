//! EngineConfig - knobs shared by the engine and its workers.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pause between two polls of one worker.
    pub worker_sleep: Duration,

    /// Upper bound of the random delay added to `worker_sleep`. Zero disables it.
    pub worker_jitter: Duration,

    /// How often `stop_blocking` re-checks the running flag.
    pub stop_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_sleep: Duration::from_secs(1),
            worker_jitter: Duration::ZERO,
            stop_poll_interval: Duration::from_millis(50),
        }
    }
}

impl EngineConfig {
    pub fn worker_sleep(mut self, sleep: Duration) -> Self {
        self.worker_sleep = sleep;
        self
    }

    pub fn worker_jitter(mut self, jitter: Duration) -> Self {
        self.worker_jitter = jitter;
        self
    }

    pub fn stop_poll_interval(mut self, interval: Duration) -> Self {
        self.stop_poll_interval = interval;
        self
    }

    /// The sleep for one poll cycle, jitter included.
    pub(crate) fn next_sleep(&self) -> Duration {
        if self.worker_jitter.is_zero() {
            return self.worker_sleep;
        }
        let jitter_ms = u64::try_from(self.worker_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        self.worker_sleep.saturating_add(jitter)
    }
}
