//! Ports: the seams between the engine and its collaborators.

pub mod clock;
pub mod id_generator;
pub mod job_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{JobStore, StoreError};
