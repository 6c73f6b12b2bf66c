//! App - the engine layer
//!
//! Combines the ports into the job lifecycle.
//!
//! # Components
//! - **EngineBuilder**: construction and fail-fast handler checks
//! - **Engine**: register / enqueue / execute / inspect, owns the worker set
//! - **Dispatcher**: claim → handle → record outcome (shared with workers)
//! - **BackgroundWorker**: one sleep-then-poll loop

pub mod builder;
pub mod config;
mod dispatch;
pub mod engine;
pub mod worker;

pub use self::builder::EngineBuilder;
pub use self::config::EngineConfig;
pub use self::engine::Engine;
pub use self::worker::BackgroundWorker;
