//! EngineBuilder - engine construction and wiring
//!
//! Fail-fast: `expect_handlers()` declares the job names this process must be
//! able to run, and `build()` refuses to produce an engine if any of them has
//! no handler.

use std::future::Future;
use std::sync::Arc;

use super::config::EngineConfig;
use super::engine::Engine;
use crate::error::{Result, ShuttleError};
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};
use crate::typed::{
    FnHandler, Handler, HandlerRegistry, JobHandler, JobRef, JsonCodec, PayloadCodec, Task,
    TypedHandler,
};

/// Builds an [`Engine`].
///
/// # Example
/// ```ignore
/// let engine = Engine::builder(store)
///     .task::<SendReport, _>(SendReportHandler)
///     .expect_handlers(&[SendReport::NAME])
///     .build()?;
/// ```
pub struct EngineBuilder {
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
    codec: Arc<dyn PayloadCodec>,
    clock: Arc<dyn Clock>,
    id_generator: Option<Box<dyn IdGenerator>>,
    config: EngineConfig,
    expected_handlers: Option<Vec<String>>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            registry: HandlerRegistry::new(),
            codec: Arc::new(JsonCodec),
            clock: Arc::new(SystemClock),
            id_generator: None,
            config: EngineConfig::default(),
            expected_handlers: None,
        }
    }

    pub fn handler(mut self, name: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        self.registry.register(name, Arc::new(handler));
        self
    }

    pub fn handler_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(JobRef) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handler(name, FnHandler(f))
    }

    pub fn task<T: Task, H: Handler<T> + 'static>(self, handler: H) -> Self {
        self.handler(T::NAME, TypedHandler::<T, H>::new(handler))
    }

    /// Job names that must have a handler when `build()` is called.
    pub fn expect_handlers(mut self, names: &[&str]) -> Self {
        self.expected_handlers = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn codec(mut self, codec: impl PayloadCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Also used for ids unless an id generator is set.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn id_generator(mut self, id_generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine.
    ///
    /// Returns [`ShuttleError::MissingHandlers`] if a name passed to
    /// `expect_handlers()` has no handler.
    pub fn build(self) -> Result<Engine> {
        if let Some(expected) = &self.expected_handlers {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(ShuttleError::MissingHandlers(missing));
            }
        }
        Ok(self.into_engine())
    }

    pub(crate) fn into_engine(self) -> Engine {
        let id_generator: Box<dyn IdGenerator> = match self.id_generator {
            Some(id_generator) => id_generator,
            None => Box::new(UlidGenerator::new(Arc::clone(&self.clock))),
        };
        Engine::from_parts(
            self.store,
            self.registry,
            self.codec,
            self.clock,
            id_generator,
            self.config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryJobStore;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Ping;

    impl Task for Ping {
        const NAME: &'static str = "test.ping";
    }

    struct PingHandler;

    #[async_trait]
    impl Handler<Ping> for PingHandler {
        async fn handle(&self, _task: Ping) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn builder() -> EngineBuilder {
        EngineBuilder::new(Arc::new(InMemoryJobStore::new()))
    }

    #[test]
    fn test_build_success() {
        let engine = builder()
            .task::<Ping, _>(PingHandler)
            .expect_handlers(&[Ping::NAME])
            .build();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_build_missing_handlers() {
        let engine = builder()
            .task::<Ping, _>(PingHandler)
            .expect_handlers(&[Ping::NAME, "test.pong"])
            .build();
        assert!(matches!(
            engine,
            Err(ShuttleError::MissingHandlers(missing)) if missing == vec!["test.pong".to_string()]
        ));
    }

    #[test]
    fn test_build_no_expect_handlers() {
        let engine = builder().task::<Ping, _>(PingHandler).build();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_handlers_carry_over_to_engine() {
        let engine = builder()
            .handler_fn("b", |_job: JobRef| async { anyhow::Ok(()) })
            .task::<Ping, _>(PingHandler)
            .build()
            .unwrap();
        assert_eq!(
            engine.registered_handlers(),
            vec!["b".to_string(), Ping::NAME.to_string()]
        );
    }
}
