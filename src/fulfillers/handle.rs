//! Ownership of a running fulfiller loop.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cancels the loop when dropped; `join` waits for it to release everything it holds.
pub(crate) struct LoopHandle {
    name: String,
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl LoopHandle {
    pub(crate) fn spawn<F>(name: String, token: CancellationToken, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            token,
            join: Some(tokio::spawn(fut)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    pub(crate) async fn join(&mut self) {
        let Some(join) = self.join.as_mut() else {
            return;
        };
        if let Err(err) = join.await {
            warn!(fulfiller = %self.name, %err, "fulfiller loop ended abnormally");
        }
        self.join = None;
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
