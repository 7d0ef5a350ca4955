//! Worker pool: the dispatcher-facing composition of registries and fulfillers.
//!
//! ```text
//!                  WorkerPool::reserve_core(preference, cancel)
//!                                   │
//!                                   ▼
//!                          RequestCollection ──────────────┐
//!                           ▲               ▲              │ events
//!        SingleSourceFulfiller    MultipleSourceFulfiller  ▼
//!                 ▲                          ▲            Bus ──► listener ──► SubscriberSet
//!          local provider         ProviderCollection
//!                                  (remote agents, add/remove at runtime)
//! ```

mod builder;
#[allow(clippy::module_inception)]
mod pool;

pub use builder::WorkerPoolBuilder;
pub use pool::WorkerPool;
