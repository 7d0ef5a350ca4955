//! # SubscriberSet: per-subscriber queues and workers.
//!
//! [`emit`](SubscriberSet::emit) never waits: it clones the event into an `Arc` and
//! `try_send`s it to each subscriber's bounded queue. A worker task per subscriber
//! drains its queue in order and calls `on_event`.
//!
//! Ordering is kept per subscriber only. An event that finds a queue full is skipped for
//! that subscriber and reported as `SubscriberOverflow`, there is no retry.
//!
//! ```text
//! emit(&Event) ─┬─► queue "log"     ─► worker ─► LogWriter::on_event
//!               ├─► queue "metrics" ─► worker ─► Metrics::on_event
//!               └─► queue ...
//! ```
//!
//! Overflow and panic events go to the [`Bus`] only. The pool's listener does not feed
//! them back into the set, otherwise a stuck subscriber would amplify its own overflow.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, warn};

use crate::events::{Bus, Event};

use super::Subscribe;

struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out of pool events to a fixed list of subscribers.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let worker_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sub.on_event(ev.as_ref());
                    if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = panic_message(panic.as_ref());
                        error!(subscriber = name, %info, "subscriber panicked");
                        worker_bus.publish(Event::subscriber_panicked(name, info));
                    }
                }
            });

            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Queues `event` for every subscriber without waiting.
    ///
    /// A subscriber whose queue is full (or whose worker is gone) misses the event
    /// and `SubscriberOverflow` is published.
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            warn!(subscriber = channel.name, reason, seq = event.seq, "subscriber dropped event");
            self.bus
                .publish(Event::subscriber_overflow(channel.name, reason));
        }
    }

    /// Closes the queues and waits until every worker has drained its own.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
