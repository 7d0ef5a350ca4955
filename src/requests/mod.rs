//! Requests for cores and the request registry.
//!
//! ## Contents
//! - [`RequestCollection`] authoritative set of live requests, counters and notifications
//! - [`WorkerCoreRequest`] consumer handle; releasing or dropping it gives the core back
//! - [`RequestStatistics`] the four counters, snapshotted with every request event
//! - [`PendingRequest`] read-only view of an unfulfilled request, used by fulfillers
//!
//! ## Lifecycle
//! ```text
//! create_unfulfilled_request ──► Unfulfilled ──fulfill──► Fulfilled ──release/drop──► Released
//!                                     └──────────────release/drop──────────────────► Released
//! ```

mod collection;
mod request;
mod stats;

pub use collection::{PendingRequest, RequestCollection};
pub use request::{RequestId, WorkerCoreRequest};
pub use stats::RequestStatistics;
