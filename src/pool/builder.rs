use std::sync::Arc;

use crate::config::Config;
use crate::cores::WorkerCore;
use crate::error::CoreError;
use crate::providers::ProviderRef;
use crate::subscribers::Subscribe;

use super::WorkerPool;

/// Builder for a [`WorkerPool`].
pub struct WorkerPoolBuilder<C: WorkerCore> {
    pub(super) cfg: Config,
    pub(super) local: Option<ProviderRef<C>>,
    pub(super) remote: Vec<ProviderRef<C>>,
    pub(super) subscribers: Vec<Arc<dyn Subscribe>>,
}

impl<C: WorkerCore> WorkerPoolBuilder<C> {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            local: None,
            remote: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Sets the provider served by the single-source fulfiller (the local machine).
    pub fn with_local_provider(mut self, provider: ProviderRef<C>) -> Self {
        self.local = Some(provider);
        self
    }

    /// Registers remote providers known at startup. More can be added later with
    /// [`WorkerPool::add_remote_provider`].
    pub fn with_remote_providers(mut self, providers: Vec<ProviderRef<C>>) -> Self {
        self.remote.extend(providers);
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive request, provider and fulfiller events through dedicated
    /// workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the pool and starts its fulfillers. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// [`CoreError::DuplicateProvider`] when two remote providers share an id.
    pub fn build(self) -> Result<Arc<WorkerPool<C>>, CoreError> {
        WorkerPool::start(self).map(Arc::new)
    }
}
