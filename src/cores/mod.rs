//! Core handles and allocation preferences.
//!
//! A *core* is one unit of compute capacity: a local CPU slot or a slot on a remote
//! build agent. The crate never looks inside a core; it only moves it between a
//! provider, the request registry and a request, and drops it exactly once.
//!
//! ## Contents
//! - [`WorkerCore`] RAII handle trait, dropping it returns the capacity
//! - [`CoreLiveness`] optional liveness check for cores that can die after allocation
//! - [`CorePreference`] what a request accepts
//! - [`CoreLocality`] where a provider's cores live

mod handle;
mod preference;

pub use handle::{CoreLiveness, WorkerCore};
pub(crate) use handle::is_alive;
pub use preference::{CoreLocality, CorePreference};
