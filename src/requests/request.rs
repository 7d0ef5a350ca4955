//! # Consumer-side request handle.
//!
//! A [`WorkerCoreRequest`] is created unfulfilled by the
//! [`RequestCollection`](super::RequestCollection). A fulfiller later attaches a core,
//! which travels to the handle through a oneshot channel. The consumer awaits it with
//! [`wait_for_core`](WorkerCoreRequest::wait_for_core), runs its work, then releases the
//! handle.
//!
//! Release happens exactly once: `release()` consumes the handle and `Drop` does the
//! same work for every other exit path (errors, panics, cancelled futures). The
//! registry counters are updated first, then the core is dropped, which gives the
//! capacity back to its provider.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cores::{CorePreference, WorkerCore};
use crate::error::CoreError;

use super::collection::Shared;

/// Registry-unique request id. Ids increase with creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Builds an id from its raw value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Demand for one core.
pub struct WorkerCoreRequest<C: WorkerCore> {
    id: RequestId,
    preference: CorePreference,
    requested_at: Instant,
    collection: Arc<Shared<C>>,
    // Fields below drop after `Drop::drop` has updated the registry.
    core: Option<C>,
    delivery: Option<oneshot::Receiver<C>>,
}

impl<C: WorkerCore> WorkerCoreRequest<C> {
    pub(super) fn new(
        id: RequestId,
        preference: CorePreference,
        requested_at: Instant,
        collection: Arc<Shared<C>>,
        delivery: oneshot::Receiver<C>,
    ) -> Self {
        Self {
            id,
            preference,
            requested_at,
            collection,
            core: None,
            delivery: Some(delivery),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn preference(&self) -> CorePreference {
        self.preference
    }

    /// When the request was registered.
    pub fn requested_at(&self) -> Instant {
        self.requested_at
    }

    /// Waits until a core is attached or `cancel` fires.
    ///
    /// Cancellation takes priority over a core delivered at the same moment; the core
    /// then stays with the handle and is returned when the handle is released.
    ///
    /// # Errors
    /// - [`CoreError::Cancelled`] when `cancel` fired first.
    /// - [`CoreError::Detached`] when the registry dropped the delivery channel.
    pub async fn wait_for_core(&mut self, cancel: &CancellationToken) -> Result<&C, CoreError> {
        if self.core.is_some() {
            return self.core.as_ref().ok_or(CoreError::Detached { id: self.id });
        }

        let delivered = {
            let Some(delivery) = self.delivery.as_mut() else {
                return Err(CoreError::Detached { id: self.id });
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                res = delivery => res,
            }
        };

        self.delivery = None;
        match delivered {
            Ok(core) => Ok(&*self.core.insert(core)),
            Err(_) => Err(CoreError::Detached { id: self.id }),
        }
    }

    /// Returns the core if one has been attached, without waiting.
    pub fn try_core(&mut self) -> Option<&C> {
        if self.core.is_none() {
            let delivery = self.delivery.as_mut()?;
            match delivery.try_recv() {
                Ok(core) => {
                    self.delivery = None;
                    self.core = Some(core);
                }
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.delivery = None;
                    return None;
                }
            }
        }
        self.core.as_ref()
    }

    /// Releases the request and returns its core (if any) to the provider.
    pub fn release(self) {
        drop(self);
    }
}

impl<C: WorkerCore> Drop for WorkerCoreRequest<C> {
    fn drop(&mut self) {
        self.collection.release(self.id);
    }
}

impl<C: WorkerCore> fmt::Debug for WorkerCoreRequest<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerCoreRequest")
            .field("id", &self.id)
            .field("preference", &self.preference)
            .field("has_core", &self.core.is_some())
            .finish()
    }
}
