//! Engine: the scheduling loop thread plus the intake that feeds it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::core::error::{AppResult, SchedulerError};
use crate::core::scheduler::Scheduler;
use crate::core::status_proxy::StatusContext;
use crate::runtime::api::Health;
use crate::runtime::intake::JobIntake;

/// A configured engine. Build one with
/// [`EngineBuilder`](crate::builders::EngineBuilder).
///
/// The loop runs on its own OS thread between [`start`](Self::start) and
/// [`stop`](Self::stop). An engine is started at most once; dropping it
/// stops it.
pub struct Engine {
    config: EngineConfig,
    scheduler: Arc<Scheduler>,
    intake: JobIntake,
    loop_thread: Mutex<Option<JoinHandle<Result<(), SchedulerError>>>>,
}

impl Engine {
    pub(crate) fn new(config: EngineConfig, scheduler: Arc<Scheduler>, intake: JobIntake) -> Self {
        Self {
            config,
            scheduler,
            intake,
            loop_thread: Mutex::new(None),
        }
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submission and editing API.
    #[must_use]
    pub const fn intake(&self) -> &JobIntake {
        &self.intake
    }

    /// The scheduling loop, for hosts that drive cycles themselves.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Shared collaborators: store, clock and publisher.
    #[must_use]
    pub fn context(&self) -> &StatusContext {
        self.scheduler.context()
    }

    /// Spawn the scheduling loop thread. Recovery runs first on that thread.
    ///
    /// # Errors
    ///
    /// Fails when the engine was already stopped or the thread cannot be spawned.
    pub fn start(&self) -> AppResult<()> {
        let mut slot = self.loop_thread.lock();
        if slot.is_some() {
            return Ok(());
        }
        if self.scheduler.stop_requested() {
            return Err(SchedulerError::PoolShutdown.into());
        }
        let scheduler = Arc::clone(&self.scheduler);
        let handle = thread::Builder::new()
            .name(format!("{}-scheduler", self.config.name))
            .spawn(move || {
                let result = scheduler.run();
                if let Err(e) = &result {
                    error!(error = %e, "scheduler exited with error");
                }
                result
            })?;
        *slot = Some(handle);
        info!(
            name = %self.config.name,
            stat_threads = self.config.stat_threads,
            normal_threads = self.config.normal_threads,
            "engine started"
        );
        Ok(())
    }

    /// Stop the loop, then the worker pool. Running processors get the
    /// configured grace period.
    ///
    /// # Errors
    ///
    /// Returns the loop's own error, if it exited with one.
    pub fn stop(&self) -> AppResult<()> {
        self.scheduler.request_stop();
        let handle = self.loop_thread.lock().take();
        let result = match handle {
            Some(handle) => match handle.join() {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(anyhow::anyhow!("scheduler thread panicked")),
            },
            None => Ok(()),
        };
        self.scheduler.shutdown_pool();
        info!(name = %self.config.name, "engine stopped");
        result
    }

    /// Whether the loop thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.loop_thread
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Liveness and pool utilization.
    #[must_use]
    pub fn health(&self) -> Health {
        Health {
            running: self.is_running(),
            pool: self.scheduler.pool_stats(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.scheduler.stop_requested() || self.loop_thread.get_mut().is_some() {
            if let Err(e) = self.stop() {
                error!(error = %e, "engine stop failed during drop");
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
