//! One obtainment: `request_core` followed by the liveness check.
//!
//! Both run inside the spawned obtain task, so a provider that is slow to answer or a
//! check that hangs on a vanished agent only holds up its own slot.

use tokio_util::sync::CancellationToken;

use crate::cores::{WorkerCore, is_alive};
use crate::error::CoreError;
use crate::providers::WorkerCoreProvider;

/// Outcome of one obtain task.
pub(super) enum Obtained<C> {
    /// Live core, ready to be attached.
    Core(C),
    /// The core failed its liveness check and has already been dropped.
    Dead,
    Failed(CoreError),
}

/// Requests a core and checks its liveness before handing it to the loop.
pub(super) async fn obtain_live<C: WorkerCore>(
    provider: &dyn WorkerCoreProvider<C>,
    cancel: &CancellationToken,
) -> Obtained<C> {
    let core = match provider.request_core(cancel).await {
        Ok(core) => core,
        Err(err) => return Obtained::Failed(err),
    };
    if is_alive(&core, cancel).await {
        return Obtained::Core(core);
    }
    drop(core);
    if cancel.is_cancelled() {
        Obtained::Failed(CoreError::Cancelled)
    } else {
        Obtained::Dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::{OwnedSemaphorePermit, Semaphore};

    use crate::cores::{CoreLiveness, CoreLocality};

    struct Checked {
        alive: bool,
        _permit: OwnedSemaphorePermit,
    }

    #[async_trait]
    impl CoreLiveness for Checked {
        async fn is_alive(&self, cancel: &CancellationToken) -> bool {
            if cancel.is_cancelled() {
                return false;
            }
            self.alive
        }
    }

    impl WorkerCore for Checked {
        fn liveness(&self) -> Option<&dyn CoreLiveness> {
            Some(self)
        }
    }

    struct Flaky {
        alive: bool,
        slots: Arc<Semaphore>,
    }

    #[async_trait]
    impl WorkerCoreProvider<Checked> for Flaky {
        fn id(&self) -> &str {
            "flaky"
        }

        fn locality(&self) -> CoreLocality {
            CoreLocality::Remote
        }

        async fn request_core(&self, _cancel: &CancellationToken) -> Result<Checked, CoreError> {
            let permit = Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .map_err(|_| CoreError::ProviderClosed { id: "flaky".into() })?;
            Ok(Checked {
                alive: self.alive,
                _permit: permit,
            })
        }
    }

    #[tokio::test]
    async fn dead_core_is_dropped_inside_the_task() {
        let provider = Flaky {
            alive: false,
            slots: Arc::new(Semaphore::new(1)),
        };
        let token = CancellationToken::new();

        assert!(matches!(obtain_live(&provider, &token).await, Obtained::Dead));
        assert_eq!(provider.slots.available_permits(), 1);
    }

    #[tokio::test]
    async fn live_core_is_handed_over() {
        let provider = Flaky {
            alive: true,
            slots: Arc::new(Semaphore::new(1)),
        };
        let token = CancellationToken::new();

        assert!(matches!(obtain_live(&provider, &token).await, Obtained::Core(_)));
        assert_eq!(provider.slots.available_permits(), 1);
    }

    #[tokio::test]
    async fn check_cut_short_by_cancellation_is_not_a_dying_core() {
        let provider = Flaky {
            alive: true,
            slots: Arc::new(Semaphore::new(1)),
        };
        let token = CancellationToken::new();
        token.cancel();

        let outcome = obtain_live(&provider, &token).await;
        assert!(matches!(outcome, Obtained::Failed(CoreError::Cancelled)));
        assert_eq!(provider.slots.available_permits(), 1);
    }
}
