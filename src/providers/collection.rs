//! # Provider registry.
//!
//! [`ProviderCollection`] is the set of remote (or mixed) providers a
//! [`MultipleSourceFulfiller`](crate::MultipleSourceFulfiller) draws from. Providers can
//! be added and removed at any time, including while the fulfiller is running: every
//! change is published on the bus (`ProviderAdded` / `ProviderRemoved`) and the
//! fulfiller reconciles its per-provider slots on the next pass.
//!
//! The collection is a cheap `Clone` handle; clones share the same set.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::cores::WorkerCore;
use crate::error::CoreError;
use crate::events::{Bus, Event, EventKind};

use super::ProviderRef;

/// Dynamic set of providers, in insertion order.
pub struct ProviderCollection<C: WorkerCore> {
    providers: Arc<RwLock<Vec<ProviderRef<C>>>>,
    bus: Bus,
}

impl<C: WorkerCore> Clone for ProviderCollection<C> {
    fn clone(&self) -> Self {
        Self {
            providers: Arc::clone(&self.providers),
            bus: self.bus.clone(),
        }
    }
}

impl<C: WorkerCore> ProviderCollection<C> {
    /// Creates an empty collection publishing on `bus`.
    pub fn new(bus: Bus) -> Self {
        Self {
            providers: Arc::new(RwLock::new(Vec::new())),
            bus,
        }
    }

    /// Registers a provider.
    ///
    /// Returns [`CoreError::DuplicateProvider`] if a provider with the same id exists.
    pub fn add(&self, provider: ProviderRef<C>) -> Result<(), CoreError> {
        let mut providers = self.providers.write();
        if providers.iter().any(|p| p.id() == provider.id()) {
            return Err(CoreError::DuplicateProvider {
                id: provider.id().to_string(),
            });
        }
        let id: Arc<str> = Arc::from(provider.id());
        providers.push(provider);
        self.bus
            .publish(Event::new(EventKind::ProviderAdded).with_provider(id));
        Ok(())
    }

    /// Unregisters a provider and returns it.
    ///
    /// Running fulfillers cancel its obtainment and drop any core they hold for it.
    pub fn remove(&self, id: &str) -> Option<ProviderRef<C>> {
        let mut providers = self.providers.write();
        let idx = providers.iter().position(|p| p.id() == id)?;
        let removed = providers.remove(idx);
        self.bus
            .publish(Event::new(EventKind::ProviderRemoved).with_provider(id));
        Some(removed)
    }

    /// True if a provider with this id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.providers.read().iter().any(|p| p.id() == id)
    }

    /// Point-in-time copy of the registered providers.
    pub fn snapshot(&self) -> Vec<ProviderRef<C>> {
        self.providers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// Receiver for events published on this collection's bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cores::CoreLocality;
    use crate::providers::{SemaphoreCoreProvider, SlotCore};

    fn provider(id: &str) -> ProviderRef<SlotCore> {
        SemaphoreCoreProvider::arc(id, CoreLocality::Remote, 1)
    }

    #[tokio::test]
    async fn add_remove_and_notify() {
        let providers = ProviderCollection::<SlotCore>::new(Bus::new(16));
        let mut rx = providers.subscribe();

        providers.add(provider("a")).unwrap();
        providers.add(provider("b")).unwrap();
        assert_eq!(providers.len(), 2);
        assert!(providers.contains("b"));

        let removed = providers.remove("a").unwrap();
        assert_eq!(removed.id(), "a");
        assert!(providers.remove("a").is_none());

        let ids: Vec<_> = providers.snapshot().iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["b".to_string()]);

        let kinds: Vec<_> = (0..3).map(|_| rx.try_recv().unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ProviderAdded,
                EventKind::ProviderAdded,
                EventKind::ProviderRemoved
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let providers = ProviderCollection::<SlotCore>::new(Bus::new(16));
        providers.add(provider("agent")).unwrap();
        let err = providers.add(provider("agent")).unwrap_err();
        assert_eq!(err.as_label(), "provider_duplicate");
        assert_eq!(providers.len(), 1);
    }
}
