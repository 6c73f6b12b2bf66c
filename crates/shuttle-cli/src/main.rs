use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shuttle_core::{
    CleanUpConfig, Engine, Handler, InMemoryJobStore, JobConfig, JobRef, JobStore,
    SqliteJobStore, Task,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::{AppConfig, StorageBackend};

#[derive(Debug, Serialize, Deserialize)]
struct Deposit {
    cents: i64,
}

impl Task for Deposit {
    const NAME: &'static str = "demo.deposit";
}

struct DepositHandler {
    balance: Arc<AtomicI64>,
}

#[async_trait]
impl Handler<Deposit> for DepositHandler {
    async fn handle(&self, task: Deposit) -> anyhow::Result<()> {
        self.balance.fetch_add(task.cents, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = config::load(config_path.as_deref())?;
    init_tracing(&config.telemetry.log_level);
    info!(
        target: "cli",
        config_path = ?config_path,
        backend = ?config.storage.backend,
        workers = config.workers.count,
        "configuration loaded"
    );

    let store = open_store(&config).await?;
    let balance = Arc::new(AtomicI64::new(0));
    let engine = Engine::builder(store)
        .config(config.workers.engine_config())
        .task::<Deposit, _>(DepositHandler {
            balance: Arc::clone(&balance),
        })
        // fails on its first attempt, succeeds on the retry
        .handler_fn("demo.flaky", |job: JobRef| async move {
            anyhow::ensure!(job.retry_count() > 0, "first attempt of {} fails", job.id());
            Ok(())
        })
        .handler_fn("demo.heartbeat", |job: JobRef| async move {
            info!(target: "cli", job_id = %job.id(), "heartbeat");
            anyhow::Ok(())
        })
        .expect_handlers(&[Deposit::NAME, "demo.flaky", "demo.heartbeat"])
        .build()?;

    for cents in 1..=config.demo.jobs {
        engine
            .enqueue_task(&Deposit { cents: cents as i64 }, JobConfig::new())
            .await?;
    }
    engine
        .enqueue_job("demo.flaky", &(), JobConfig::new().max_retry(1))
        .await?;
    engine
        .enqueue_job(
            "demo.heartbeat",
            &(),
            JobConfig::new()
                .identifier("heartbeat")
                .repeat_every(Duration::from_millis(250)),
        )
        .await?;

    for _ in 0..config.workers.count {
        engine.new_background_worker();
    }
    engine.start_all_workers();
    info!(target: "cli", workers = config.workers.count, "workers started");

    tokio::select! {
        result = wait_until_drained(&engine) => result?,
        _ = tokio::signal::ctrl_c() => warn!(target: "cli", "interrupted"),
    }

    engine.destroy_all_workers().await;

    let counts = engine.counts().await?;
    let heartbeat = engine.named_job_info("heartbeat").await?;
    let removed = engine
        .clean_up(CleanUpConfig::older_than(Duration::ZERO))
        .await?;
    info!(
        target: "cli",
        pending = counts.pending,
        done = counts.done,
        retry = counts.retry,
        failed = counts.failed,
        balance = balance.load(Ordering::SeqCst),
        heartbeat_last_run = ?heartbeat.last_run,
        removed,
        "demo finished"
    );
    Ok(())
}

fn init_tracing(default_level: &str) {
    let fmt_layer = fmt::layer().with_target(true).with_thread_names(true).with_level(true);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn JobStore>> {
    let store: Arc<dyn JobStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryJobStore::new()),
        StorageBackend::Sqlite => Arc::new(
            SqliteJobStore::connect(&config.storage.url, config.storage.max_connections).await?,
        ),
    };
    Ok(store)
}

/// Wait until only the repeating heartbeat is left unfinished.
async fn wait_until_drained(engine: &Engine) -> Result<()> {
    loop {
        let counts = engine.counts().await?;
        if counts.retry == 0 && counts.running == 0 && counts.pending <= 1 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
