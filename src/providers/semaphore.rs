//! # Semaphore-backed provider.
//!
//! [`SemaphoreCoreProvider`] models a fixed number of slots (the local CPU count, or
//! the slots a remote agent announced). Each [`SlotCore`] owns a semaphore permit, so
//! dropping it returns the slot without any bookkeeping elsewhere.
//!
//! ## Example
//! ```rust
//! use corevisor::{CoreLocality, SemaphoreCoreProvider, WorkerCoreProvider};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let local = SemaphoreCoreProvider::new("local", CoreLocality::Local, 2);
//! let token = CancellationToken::new();
//!
//! let core = local.request_core(&token).await.unwrap();
//! assert_eq!(local.available(), 1);
//! drop(core);
//! assert_eq!(local.available(), 2);
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::cores::{CoreLocality, WorkerCore};
use crate::error::CoreError;

use super::WorkerCoreProvider;

/// Provider with a fixed, growable number of slots.
pub struct SemaphoreCoreProvider {
    id: Arc<str>,
    locality: CoreLocality,
    slots: Arc<Semaphore>,
    issued: AtomicU64,
}

impl SemaphoreCoreProvider {
    /// Creates a provider with `capacity` slots.
    pub fn new(id: impl Into<Arc<str>>, locality: CoreLocality, capacity: usize) -> Self {
        Self {
            id: id.into(),
            locality,
            slots: Arc::new(Semaphore::new(capacity)),
            issued: AtomicU64::new(0),
        }
    }

    /// Same as [`new`](Self::new), already wrapped in an `Arc`.
    pub fn arc(id: impl Into<Arc<str>>, locality: CoreLocality, capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(id, locality, capacity))
    }

    /// Adds `n` slots (an agent announced more capacity).
    pub fn add_capacity(&self, n: usize) {
        self.slots.add_permits(n);
    }

    /// Slots not currently held by a core.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Total number of cores handed out so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Stops handing out cores; pending and future `request_core` calls fail with
    /// `ProviderClosed`. Cores already handed out stay valid.
    pub fn close(&self) {
        self.slots.close();
    }
}

#[async_trait]
impl WorkerCoreProvider<SlotCore> for SemaphoreCoreProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn locality(&self) -> CoreLocality {
        self.locality
    }

    async fn request_core(&self, cancel: &CancellationToken) -> Result<SlotCore, CoreError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            permit = Arc::clone(&self.slots).acquire_owned() => permit,
        };
        let permit = permit.map_err(|_| CoreError::ProviderClosed {
            id: self.id.to_string(),
        })?;

        let serial = self.issued.fetch_add(1, Ordering::Relaxed);
        Ok(SlotCore {
            provider: Arc::clone(&self.id),
            locality: self.locality,
            serial,
            _permit: permit,
        })
    }
}

/// Core handed out by [`SemaphoreCoreProvider`]; holds one slot until dropped.
#[derive(Debug)]
pub struct SlotCore {
    provider: Arc<str>,
    locality: CoreLocality,
    serial: u64,
    _permit: OwnedSemaphorePermit,
}

impl SlotCore {
    /// Id of the provider this slot belongs to.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn locality(&self) -> CoreLocality {
        self.locality
    }

    /// Issue number, unique per provider.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl WorkerCore for SlotCore {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn blocks_until_a_slot_is_returned() {
        let provider = Arc::new(SemaphoreCoreProvider::new("p", CoreLocality::Remote, 1));
        let token = CancellationToken::new();
        let first = provider.request_core(&token).await.unwrap();

        let waiter = {
            let provider = Arc::clone(&provider);
            let token = token.clone();
            tokio::spawn(async move { provider.request_core(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.serial(), 1);
        assert_eq!(second.provider(), "p");
        assert_eq!(provider.available(), 0);
    }

    #[tokio::test]
    async fn cancellation_consumes_nothing() {
        let provider = SemaphoreCoreProvider::new("p", CoreLocality::Local, 0);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            provider.request_core(&token).await.unwrap_err(),
            CoreError::Cancelled
        );
        provider.add_capacity(1);
        assert_eq!(provider.available(), 1);
        assert_eq!(provider.issued(), 0);
    }

    #[tokio::test]
    async fn closed_provider_reports_itself() {
        let provider = SemaphoreCoreProvider::new("agent-3", CoreLocality::Remote, 0);
        provider.close();
        let err = provider
            .request_core(&CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::ProviderClosed { id: "agent-3".into() });
    }
}
