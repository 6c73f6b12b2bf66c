//! Handler API: codec, handler traits, typed tasks and the registry.

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::{CodecError, JsonCodec, PayloadCodec};
pub use self::handler::{FnHandler, Handler, JobHandler, JobRef, TypedHandler};
pub use self::registry::HandlerRegistry;
pub use self::task::Task;
