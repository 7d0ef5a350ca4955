//! Error types used by the corevisor runtime, providers and requests.
//!
//! This module defines three error types:
//!
//! - [`CoreError`]: errors crossing the request/provider API boundary.
//! - [`FulfillRejected`]: a misused `fulfill_request` call, handing the core back.
//! - [`RuntimeError`]: errors raised by the worker pool itself (shutdown).
//!
//! Both enums provide helper methods (`as_label`, `as_message`) for logging/metrics.
//!
//! ## Taxonomy
//! - **Cancellation** is the only condition a caller sees under normal use.
//! - **Supply failures** (`ProviderClosed`, `ProviderFailed`, dying cores) are
//!   absorbed and retried by the fulfillers; they only reach code that calls a
//!   provider directly.
//! - **Misuse** (`UnknownRequest`, `AlreadyFulfilled`, `DuplicateProvider`) fails fast
//!   and is never retried.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::requests::RequestId;

/// # Errors produced by requests and providers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The caller's cancellation token fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The request is not (or no longer) registered in the collection.
    #[error("request {id} is not registered")]
    UnknownRequest {
        /// Id of the offending request.
        id: RequestId,
    },

    /// The request already holds a core.
    #[error("request {id} is already fulfilled")]
    AlreadyFulfilled {
        /// Id of the offending request.
        id: RequestId,
    },

    /// The registry side of a request went away without delivering a core.
    #[error("request {id} was detached from its collection")]
    Detached {
        /// Id of the detached request.
        id: RequestId,
    },

    /// A provider with the same id is already registered.
    #[error("provider '{id}' is already registered")]
    DuplicateProvider {
        /// The duplicated provider id.
        id: String,
    },

    /// The provider can no longer hand out cores.
    #[error("provider '{id}' is closed")]
    ProviderClosed {
        /// Id of the closed provider.
        id: String,
    },

    /// The provider failed to allocate a core; the attempt may be retried.
    #[error("provider '{id}' failed: {reason}")]
    ProviderFailed {
        /// Id of the failing provider.
        id: String,
        /// Provider-specific failure description.
        reason: String,
    },
}

impl CoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use corevisor::CoreError;
    ///
    /// assert_eq!(CoreError::Cancelled.as_label(), "core_cancelled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            CoreError::Cancelled => "core_cancelled",
            CoreError::UnknownRequest { .. } => "request_unknown",
            CoreError::AlreadyFulfilled { .. } => "request_already_fulfilled",
            CoreError::Detached { .. } => "request_detached",
            CoreError::DuplicateProvider { .. } => "provider_duplicate",
            CoreError::ProviderClosed { .. } => "provider_closed",
            CoreError::ProviderFailed { .. } => "provider_failed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            CoreError::Cancelled => "cancelled".to_string(),
            CoreError::UnknownRequest { id } => format!("unknown request: {id}"),
            CoreError::AlreadyFulfilled { id } => format!("already fulfilled: {id}"),
            CoreError::Detached { id } => format!("detached: {id}"),
            CoreError::DuplicateProvider { id } => format!("duplicate provider: {id}"),
            CoreError::ProviderClosed { id } => format!("provider closed: {id}"),
            CoreError::ProviderFailed { id, reason } => format!("provider {id}: {reason}"),
        }
    }

    /// True for [`CoreError::Cancelled`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

/// A `fulfill_request` call that the collection refused.
///
/// The core is handed back untouched so the caller can attach it elsewhere or drop it
/// (which returns the capacity to its provider).
pub struct FulfillRejected<C> {
    /// The core that was not attached.
    pub core: C,
    /// Why the core was refused.
    pub error: CoreError,
}

impl<C> FulfillRejected<C> {
    /// Drops the core and keeps the error.
    pub fn into_error(self) -> CoreError {
        self.error
    }
}

impl<C> fmt::Debug for FulfillRejected<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FulfillRejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<C> fmt::Display for FulfillRejected<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core rejected: {}", self.error)
    }
}

impl<C> std::error::Error for FulfillRejected<C> {}

/// # Errors produced by the worker pool runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some fulfillers did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of the fulfillers that did not stop in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use corevisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck fulfillers={stuck:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(CoreError::Cancelled.as_label(), "core_cancelled");
        assert_eq!(
            CoreError::AlreadyFulfilled { id: RequestId::from_raw(3) }.as_label(),
            "request_already_fulfilled"
        );
        assert_eq!(
            CoreError::ProviderFailed {
                id: "agent-1".into(),
                reason: "disconnected".into()
            }
            .as_message(),
            "provider agent-1: disconnected"
        );
    }

    #[test]
    fn only_cancelled_is_cancellation() {
        assert!(CoreError::Cancelled.is_cancellation());
        assert!(
            !CoreError::ProviderClosed {
                id: "local".into()
            }
            .is_cancellation()
        );
    }

    #[test]
    fn rejected_keeps_core_out_of_debug_output() {
        let rejected = FulfillRejected {
            core: 7u32,
            error: CoreError::UnknownRequest { id: RequestId::from_raw(1) },
        };
        assert!(format!("{rejected:?}").contains("UnknownRequest"));
        assert_eq!(rejected.to_string(), "core rejected: request #1 is not registered");
        assert_eq!(rejected.core, 7);
    }
}
