//! JobStore implementations.
//!
//! - **InMemoryJobStore**: single-process, nothing survives a restart
//! - **SqliteJobStore**: durable, backed by sqlx + SQLite

pub mod memory;
pub mod sqlite;

pub use self::memory::InMemoryJobStore;
pub use self::sqlite::SqliteJobStore;
