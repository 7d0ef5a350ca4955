//! # Core handle traits.
//!
//! [`WorkerCore`] is implemented by whatever a provider hands out. The implementation
//! returns its capacity in `Drop`, so the crate only needs to make sure every core is
//! dropped exactly once (moved into a request, or dropped on an error path).
//!
//! Remote cores may silently die between allocation and use (the agent went away).
//! Such cores expose a [`CoreLiveness`] check through [`WorkerCore::liveness`]; the
//! fulfillers call it before handing a core to a request and discard dead ones.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use corevisor::{CoreLiveness, WorkerCore};
//! use tokio_util::sync::CancellationToken;
//!
//! struct AgentSlot { connected: bool }
//!
//! #[async_trait]
//! impl CoreLiveness for AgentSlot {
//!     async fn is_alive(&self, _cancel: &CancellationToken) -> bool {
//!         self.connected
//!     }
//! }
//!
//! impl WorkerCore for AgentSlot {
//!     fn liveness(&self) -> Option<&dyn CoreLiveness> {
//!         Some(self)
//!     }
//! }
//! ```

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Liveness check for cores whose backing resource can disappear.
#[async_trait]
pub trait CoreLiveness: Send + Sync {
    /// Returns `false` when the core can no longer run work.
    ///
    /// Should return `false` promptly when `cancel` fires.
    async fn is_alive(&self, cancel: &CancellationToken) -> bool;
}

/// One allocated unit of capacity.
///
/// Implementations return the capacity to their provider when dropped.
pub trait WorkerCore: Send + Sync + 'static {
    /// Liveness check, if this kind of core can die after allocation.
    ///
    /// Default: `None` (the core is always considered alive).
    fn liveness(&self) -> Option<&dyn CoreLiveness> {
        None
    }
}

/// Checks a core if it carries a liveness capability.
pub(crate) async fn is_alive<C: WorkerCore>(core: &C, cancel: &CancellationToken) -> bool {
    match core.liveness() {
        Some(check) => check.is_alive(cancel).await,
        None => true,
    }
}

impl<C: WorkerCore> WorkerCore for Box<C> {
    fn liveness(&self) -> Option<&dyn CoreLiveness> {
        (**self).liveness()
    }
}
