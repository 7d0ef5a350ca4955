//! Background loops that move cores from providers to requests.
//!
//! ## Contents
//! - [`SingleSourceFulfiller`] one provider (the local machine)
//! - [`MultipleSourceFulfiller`] a dynamic [`ProviderCollection`](crate::ProviderCollection)
//!   (remote agents), one in-flight obtainment per provider
//!
//! Both loops share the same rules:
//! - oldest eligible request first (`RequestCollection::fulfill_oldest`);
//! - a local provider only serves `PreferRemote` requests once `Config::remote_delay` passed;
//! - cores exposing `CoreLiveness` are checked inside the obtain task, dead ones never
//!   reach the loop;
//! - provider errors back off per `Config::provider_backoff` and never reach callers;
//! - shutdown (or drop) cancels obtainments and returns every unattached core.

mod eligibility;
mod handle;
mod multiple;
mod obtain;
mod single;
mod wakeup;

pub(crate) use handle::LoopHandle;
pub use multiple::MultipleSourceFulfiller;
pub use single::SingleSourceFulfiller;
