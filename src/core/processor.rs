//! Processor contract, failure taxonomy and the kind → constructor registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::status_proxy::StatusProxy;

/// How a failure affects the job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Fail immediately without counting toward retries.
    Fatal,
    /// Fail and increment the job's failure count.
    NonFatal,
}

/// Error returned by a processor.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A resource the job needs is exhausted (for example disk space).
    #[error("out of resources: {0}")]
    OutOfResources(String),
    /// Domain failure with a caller-facing message.
    #[error("{0}")]
    Failed(String),
    /// Unexpected error; the root cause becomes the failure message.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProcessError {
    /// Resource exhaustion is fatal; everything else is not.
    #[must_use]
    pub const fn failure_type(&self) -> FailureType {
        match self {
            Self::OutOfResources(_) => FailureType::Fatal,
            Self::Failed(_) | Self::Other(_) => FailureType::NonFatal,
        }
    }

    /// Message recorded in the job's status details.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::OutOfResources(m) | Self::Failed(m) => m.clone(),
            Self::Other(e) => e.root_cause().to_string(),
        }
    }
}

/// Handler for one job kind.
///
/// A fresh processor is constructed for every dispatch. The worker calls
/// [`initialize`](Self::initialize) first, then either
/// [`process`](Self::process) or [`delete`](Self::delete), and always
/// [`dispose`](Self::dispose) last. [`cancel`](Self::cancel) may arrive from
/// another thread while `process` runs.
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_work_queue::core::{ProcessError, Processor, StatusProxy};
///
/// struct SendStudy { proxy: parking_lot::Mutex<Option<Arc<StatusProxy>>> }
///
/// #[async_trait]
/// impl Processor for SendStudy {
///     fn initialize(&self, proxy: Arc<StatusProxy>) -> bool {
///         *self.proxy.lock() = Some(proxy);
///         true
///     }
///
///     async fn process(&self) -> Result<(), ProcessError> {
///         // Transfer the study, reporting progress through the proxy.
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Prepare for work. Returning `false` postpones the job instead of failing it.
    fn initialize(&self, proxy: Arc<StatusProxy>) -> bool;

    /// Do the work. On success the worker completes the job unless the
    /// processor already moved it to another status through the proxy.
    async fn process(&self) -> Result<(), ProcessError>;

    /// Ask a running `process` to stop. The processor finishes the job itself.
    fn cancel(&self) {}

    /// Remove whatever the job produced. Called for jobs swept for deletion;
    /// the processor ends it with [`StatusProxy::delete`].
    async fn delete(&self) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Release resources. Always called last.
    fn dispose(&self) {}
}

/// Constructor for a processor.
pub type ProcessorFactory = Arc<dyn Fn() -> Arc<dyn Processor> + Send + Sync>;

/// Map from job kind to processor constructor, filled once at startup.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `kind`, replacing any earlier registration.
    pub fn register<F, P>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Processor,
    {
        let factory: ProcessorFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Processor>);
        self.factories.insert(kind.into(), factory);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with<F, P>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Processor,
    {
        self.register(kind, factory);
        self
    }

    /// New processor for `kind`, if one is registered.
    #[must_use]
    pub fn create(&self, kind: &str) -> Option<Arc<dyn Processor>> {
        self.factories.get(kind).map(|factory| factory())
    }

    /// Whether `kind` has a processor.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.kinds().collect();
        kinds.sort_unstable();
        f.debug_struct("ProcessorRegistry").field("kinds", &kinds).finish()
    }
}
