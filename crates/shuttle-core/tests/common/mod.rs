#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use shuttle_core::{EngineConfig, InMemoryJobStore, JobStore, SqliteJobStore};

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

impl Backend {
    pub async fn store(self) -> Arc<dyn JobStore> {
        match self {
            Backend::Memory => Arc::new(InMemoryJobStore::new()),
            Backend::Sqlite => Arc::new(
                SqliteJobStore::connect("sqlite::memory:", 1)
                    .await
                    .expect("in-memory sqlite"),
            ),
        }
    }
}

/// Short sleeps so background tests finish quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .worker_sleep(Duration::from_millis(2))
        .worker_jitter(Duration::from_millis(2))
        .stop_poll_interval(Duration::from_millis(2))
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check().await
}
