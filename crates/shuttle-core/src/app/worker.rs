//! BackgroundWorker - one polling loop.
//!
//! Stopped → Running (`start`) → Stopped (`stop` / `stop_blocking`).
//! A stop is cooperative: the loop exits at its next poll boundary and never
//! interrupts a handler that is already running.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use super::dispatch::Dispatcher;

pub struct BackgroundWorker {
    id: usize,
    dispatcher: Arc<Dispatcher>,
    shared: Arc<WorkerShared>,
}

struct WorkerShared {
    running: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

/// Clears the running flag when the loop exits, however it exits.
struct RunningGuard(Arc<WorkerShared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.send_replace(false);
    }
}

impl BackgroundWorker {
    pub(crate) fn new(id: usize, dispatcher: Arc<Dispatcher>) -> Self {
        let (running, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            dispatcher,
            shared: Arc::new(WorkerShared { running, shutdown }),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Launch the loop. No-op if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let started = self.shared.running.send_if_modified(|running| {
            if *running {
                return false;
            }
            *running = true;
            true
        });
        if !started {
            return;
        }

        // fresh signal for this run
        self.shared.shutdown.send_replace(false);
        let shutdown = self.shared.shutdown.subscribe();
        let guard = RunningGuard(Arc::clone(&self.shared));
        let dispatcher = Arc::clone(&self.dispatcher);
        let worker_id = self.id;

        info!(target: "worker", worker_id, "worker starting");
        tokio::spawn(async move {
            let _guard = guard;
            run_loop(worker_id, dispatcher, shutdown).await;
            info!(target: "worker", worker_id, "worker stopped");
        });
    }

    /// Ask the loop to exit and return immediately.
    pub fn stop(&self) {
        if self.is_running() {
            debug!(target: "worker", worker_id = self.id, "stop requested");
        }
        self.shared.shutdown.send_replace(true);
    }

    /// Ask the loop to exit and wait until it has.
    ///
    /// Returns only once [`is_running`](Self::is_running) is false, which may
    /// take as long as the handler currently in progress.
    pub async fn stop_blocking(&self) {
        self.stop();
        let poll = self.dispatcher.config.stop_poll_interval;
        while self.is_running() {
            tokio::time::sleep(poll).await;
        }
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }
}

impl std::fmt::Debug for BackgroundWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_loop(worker_id: usize, dispatcher: Arc<Dispatcher>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        // wake early if a stop arrives mid-sleep
        let sleep = dispatcher.config.next_sleep();
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(sleep) => {}
        }

        dispatcher.background_execute(worker_id).await;
    }
}
