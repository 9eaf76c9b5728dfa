//! Builder assembling an [`Engine`] from its collaborators and configuration.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::error::SchedulerError;
use crate::core::events::{ChangePublisher, ChangeSink};
use crate::core::processor::{Processor, ProcessorRegistry};
use crate::core::scheduler::Scheduler;
use crate::core::status_proxy::StatusContext;
use crate::core::store::JobStore;
use crate::infra::store::InMemoryJobStore;
use crate::runtime::engine::Engine;
use crate::runtime::intake::{IntakeSettings, JobIntake};
use crate::util::clock::{SharedClock, SystemClock};

/// Collects the store, processors, clock, change sink and configuration.
///
/// Unset collaborators default to an in-memory store, the system clock and
/// no change notifications.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn JobStore>>,
    registry: ProcessorRegistry,
    clock: Option<SharedClock>,
    publisher: Option<ChangePublisher>,
}

impl EngineBuilder {
    /// Builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `store` as the job store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the processor registry.
    #[must_use]
    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a processor constructor for `kind`.
    #[must_use]
    pub fn with_processor<F, P>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Processor,
    {
        self.registry.register(kind, factory);
        self
    }

    /// Use `clock` for every timestamp.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Publish change notifications to `sink`.
    #[must_use]
    pub fn with_change_sink(mut self, sink: impl ChangeSink + 'static) -> Self {
        self.publisher = Some(ChangePublisher::new(sink));
        self
    }

    /// Validate the configuration, start the worker pool and return the
    /// engine. The scheduling loop starts with [`Engine::start`].
    pub fn build(self) -> Result<Engine, SchedulerError> {
        self.config.validate()?;

        let ctx = StatusContext {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryJobStore::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            publisher: self.publisher.unwrap_or_default(),
            timings: self.config.proxy_timings(),
        };
        let scheduler = Arc::new(Scheduler::new(
            ctx.clone(),
            self.registry,
            self.config.pool_config(),
            self.config.scheduler_settings(),
        )?);
        let intake = JobIntake::new(
            ctx,
            IntakeSettings {
                intake_delay: self.config.intake_delay(),
                expire_delay: self.config.expire_delay(),
                delete_delay: self.config.delete_delay(),
            },
        )
        .attached(Arc::clone(&scheduler));

        Ok(Engine::new(self.config, scheduler, intake))
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("custom_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
