//! # Provider trait.
//!
//! A provider owns some capacity (local CPU slots, one remote agent) and hands it out
//! one core at a time. `request_core` is expected to block while the capacity is
//! exhausted; the fulfillers call it from background tasks and cancel it when the core
//! is no longer needed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cores::{CoreLocality, WorkerCore};
use crate::error::CoreError;

/// Shared handle to a provider.
pub type ProviderRef<C> = Arc<dyn WorkerCoreProvider<C>>;

/// Supply source for cores of type `C`.
///
/// ### Contract
/// - `id()` is stable and unique within a [`ProviderCollection`](crate::ProviderCollection).
/// - `request_core` returns `Err(CoreError::Cancelled)` once `cancel` fires, without
///   consuming capacity.
/// - Dropping a returned core gives back exactly one unit of capacity.
#[async_trait]
pub trait WorkerCoreProvider<C: WorkerCore>: Send + Sync + 'static {
    /// Stable provider id.
    fn id(&self) -> &str;

    /// Where this provider's cores live.
    fn locality(&self) -> CoreLocality;

    /// Waits until a core is available and returns it.
    async fn request_core(&self, cancel: &CancellationToken) -> Result<C, CoreError>;
}
