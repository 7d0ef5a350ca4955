//! Retry policies for failing providers.
//!
//! A provider that returns an error from `request_core` (a disconnected agent, an
//! exhausted quota) is not asked again right away. The fulfiller records the number of
//! consecutive failures and waits `BackoffPolicy::next(failures)` before retrying it.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy so many fulfillers do not retry in lockstep
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=250ms, factor=2.0, max=10s, jitter=Equal.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
