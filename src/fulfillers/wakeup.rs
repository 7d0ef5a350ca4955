//! Idle wait shared by both fulfiller loops.
//!
//! A loop sleeps until one of:
//! - a request or provider registry change on the bus (a lag counts as a change),
//! - an obtainment task finished (`Notify`),
//! - the earliest deferred request or provider retry becomes due,
//! - cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, broadcast, broadcast::error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::events::Event;

pub(crate) struct Wakeup {
    events: broadcast::Receiver<Event>,
    notify: Arc<Notify>,
    bus_closed: bool,
}

impl Wakeup {
    pub(crate) fn new(events: broadcast::Receiver<Event>, notify: Arc<Notify>) -> Self {
        Self {
            events,
            notify,
            bus_closed: false,
        }
    }

    /// Returns `false` once `token` is cancelled.
    pub(crate) async fn wait(&mut self, token: &CancellationToken, timeout: Option<Duration>) -> bool {
        let sleep = tokio::time::sleep(timeout.unwrap_or(Duration::MAX));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                _ = self.notify.notified() => return true,
                ev = self.events.recv(), if !self.bus_closed => match ev {
                    Ok(ev) if ev.is_request_change() || ev.is_provider_change() => return true,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => return true,
                    Err(RecvError::Closed) => self.bus_closed = true,
                },
                _ = &mut sleep, if timeout.is_some() => return true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Bus, EventKind};

    #[tokio::test]
    async fn ignores_unrelated_events() {
        let bus = Bus::new(8);
        let notify = Arc::new(Notify::new());
        let mut wakeup = Wakeup::new(bus.subscribe(), Arc::clone(&notify));
        let token = CancellationToken::new();

        bus.publish(Event::new(EventKind::CoreObtained));
        bus.publish(Event::new(EventKind::ProviderAdded));
        assert!(wakeup.wait(&token, None).await);
        assert!(wakeup.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn completion_permit_is_kept_until_waited() {
        let bus = Bus::new(8);
        let notify = Arc::new(Notify::new());
        let mut wakeup = Wakeup::new(bus.subscribe(), Arc::clone(&notify));
        notify.notify_one();
        assert!(wakeup.wait(&CancellationToken::new(), None).await);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_and_cancellation() {
        let bus = Bus::new(8);
        let mut wakeup = Wakeup::new(bus.subscribe(), Arc::new(Notify::new()));
        let token = CancellationToken::new();
        assert!(wakeup.wait(&token, Some(Duration::from_millis(30))).await);

        token.cancel();
        assert!(!wakeup.wait(&token, None).await);
    }
}
