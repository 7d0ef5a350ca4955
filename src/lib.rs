//! # corevisor
//!
//! **Corevisor** is the worker-core engine of a distributed build tool.
//!
//! A build dispatcher asks for *cores* (one unit of compute: a local CPU slot or a slot
//! on a remote build agent), runs one action on each, and gives them back. Corevisor
//! keeps the registry of outstanding requests and runs background fulfillers that
//! obtain cores from providers and attach them to the oldest eligible request.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   dispatcher                                dispatcher
//!   reserve_core(pref) ──┐              ┌──── request.release() / drop
//!                        ▼              │
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  RequestCollection (authoritative registry)                       │
//! │  - BTreeMap<RequestId, Entry> (ordered by age)                    │
//! │  - RequestStatistics (4 counters)                                 │
//! │  - publishes RequestCreated / Fulfilled / Released under its lock │
//! └──────┬───────────────────────────────────────────────▲────────────┘
//!        │ notifications (Bus)                           │ fulfill_oldest(core)
//!        ▼                                               │
//! ┌────────────────────────────┐       ┌────────────────────────────────┐
//! │  SingleSourceFulfiller     │       │  MultipleSourceFulfiller       │
//! │  (local provider)          │       │  (ProviderCollection, dynamic) │
//! │  - parallel obtainments    │       │  - one slot per provider       │
//! │  - remote_delay deferral   │       │  - headroom, backoff           │
//! └──────┬─────────────────────┘       └──────┬─────────────────────────┘
//!        │ request_core(cancel)               │ request_core(cancel)
//!        ▼                                    ▼
//!   WorkerCoreProvider (local)       WorkerCoreProvider × N (remote agents)
//!
//!   every component ──► Bus (broadcast) ──► subscriber listener ──► SubscriberSet
//!                                                                   ├─► LogWriter
//!                                                                   └─► custom
//! ```
//!
//! ### Request lifecycle
//! ```text
//! create ──► Unfulfilled ──fulfill──► Fulfilled ──release/drop──► Released
//!                 └────────────── release/drop ─────────────────► Released
//!
//! unfulfilled = created - fulfilled - released_unfulfilled
//! fulfilled   = fulfilled - released_fulfilled
//! ```
//!
//! ### Core ownership
//! ```text
//! provider ──► fulfiller (ready / held) ──► request ──► drop ──► provider
//!                     └── dead, surplus or shutdown ──► drop ──► provider
//! ```
//!
//! ## Features
//! | Area              | Description                                                     | Key types / traits                                   |
//! |-------------------|-----------------------------------------------------------------|------------------------------------------------------|
//! | **Requests**      | Register demand for a core, wait for it, release it.            | [`RequestCollection`], [`WorkerCoreRequest`]         |
//! | **Providers**     | Sources of cores, local or remote, added and removed at runtime.| [`WorkerCoreProvider`], [`ProviderCollection`]       |
//! | **Fulfillers**    | Background loops matching cores to the oldest eligible request. | [`SingleSourceFulfiller`], [`MultipleSourceFulfiller`] |
//! | **Pool**          | Wires everything together with graceful shutdown.               | [`WorkerPool`], [`WorkerPoolBuilder`]                |
//! | **Subscriber API**| Hook into registry and fulfiller events.                        | [`Subscribe`], [`Event`]                             |
//! | **Policies**      | Retry delays for failing providers.                             | [`BackoffPolicy`], [`JitterPolicy`]                  |
//! | **Errors**        | Typed errors for callers and shutdown.                          | [`CoreError`], [`RuntimeError`]                      |
//! | **Configuration** | Centralize runtime settings.                                    | [`Config`]                                           |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use corevisor::{Config, CoreLocality, CorePreference, SemaphoreCoreProvider, SlotCore, WorkerPool};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build subscribers (optional)
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn corevisor::Subscribe>> = vec![Arc::new(corevisor::LogWriter::default())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn corevisor::Subscribe>> = Vec::new();
//!
//!     let local = SemaphoreCoreProvider::arc("local", CoreLocality::Local, 4);
//!     let pool = WorkerPool::<SlotCore>::builder(Config::default())
//!         .with_local_provider(local.clone())
//!         .with_subscribers(subs)
//!         .build()?;
//!
//!     let token = CancellationToken::new();
//!     let mut request = pool.reserve_core(CorePreference::RequireLocal, &token).await?;
//!     let core = request.wait_for_core(&token).await?;
//!     assert_eq!(core.provider(), "local");
//!     assert_eq!(pool.statistics().fulfilled(), 1);
//!
//!     request.release();
//!     pool.shutdown().await?;
//!     assert_eq!(local.available(), 4);
//!     Ok(())
//! }
//! ```

mod config;
mod cores;
mod error;
mod events;
mod fulfillers;
mod policies;
mod pool;
mod providers;
mod requests;
mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use cores::{CoreLiveness, CoreLocality, CorePreference, WorkerCore};
pub use error::{CoreError, FulfillRejected, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use fulfillers::{MultipleSourceFulfiller, SingleSourceFulfiller};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use pool::{WorkerPool, WorkerPoolBuilder};
pub use providers::{ProviderCollection, ProviderRef, SemaphoreCoreProvider, SlotCore, WorkerCoreProvider};
pub use requests::{PendingRequest, RequestCollection, RequestId, RequestStatistics, WorkerCoreRequest};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
