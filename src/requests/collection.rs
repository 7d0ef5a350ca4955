//! # Request registry.
//!
//! [`RequestCollection`] is the authoritative set of live requests. All state (the
//! ordered request map and the four counters) sits behind one `parking_lot::Mutex`;
//! every transition updates the counters and publishes its event inside the same
//! critical section, so each event's statistics snapshot is exact and the events of a
//! request arrive in transition order. The lock is never held across an `.await`.
//!
//! ## Flow
//! ```text
//! consumer                      RequestCollection                    fulfiller
//!    │ create_fulfilled_request ──► insert (Unfulfilled) ──► RequestCreated ──► wakes
//!    │   wait_for_core ◄──────────── oneshot ◄── fulfill_oldest(core, eligible) ◄─┘
//!    │ ... run work ...
//!    └─ release / drop ───────────► remove ──► RequestReleased, then core dropped
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cores::{CorePreference, WorkerCore};
use crate::error::{CoreError, FulfillRejected};
use crate::events::{Bus, Event, EventKind};

use super::{RequestId, RequestStatistics, WorkerCoreRequest};

/// Read-only view of an unfulfilled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub preference: CorePreference,
    pub requested_at: Instant,
}

struct Entry<C> {
    preference: CorePreference,
    requested_at: Instant,
    /// `None` once a core has been delivered.
    delivery: Option<oneshot::Sender<C>>,
}

impl<C> Entry<C> {
    fn is_fulfilled(&self) -> bool {
        self.delivery.is_none()
    }
}

struct State<C> {
    requests: BTreeMap<RequestId, Entry<C>>,
    stats: RequestStatistics,
    next_id: u64,
}

pub(crate) struct Shared<C> {
    state: Mutex<State<C>>,
    bus: Bus,
}

impl<C: WorkerCore> Shared<C> {
    pub(super) fn release(&self, id: RequestId) {
        let mut state = self.state.lock();
        let Some(entry) = state.requests.remove(&id) else {
            return;
        };
        let fulfilled = entry.is_fulfilled();
        state.stats.record_released(entry.preference, fulfilled);
        self.bus.publish(
            Event::new(EventKind::RequestReleased)
                .with_request(id)
                .with_preference(entry.preference)
                .with_reason(if fulfilled { "fulfilled" } else { "unfulfilled" })
                .with_stats(state.stats),
        );
    }

    /// Delivers `core` to an unfulfilled entry. Must be called with the lock held.
    fn attach(
        &self,
        state: &mut State<C>,
        id: RequestId,
        core: C,
        provider: Option<&str>,
    ) -> Result<(), FulfillRejected<C>> {
        let Some(entry) = state.requests.get_mut(&id) else {
            return Err(FulfillRejected {
                core,
                error: CoreError::UnknownRequest { id },
            });
        };
        let Some(delivery) = entry.delivery.take() else {
            return Err(FulfillRejected {
                core,
                error: CoreError::AlreadyFulfilled { id },
            });
        };
        let preference = entry.preference;

        if let Err(core) = delivery.send(core) {
            // Receiver already gone: the handle is mid-drop and its release will
            // find nothing left to do.
            state.requests.remove(&id);
            state.stats.record_released(preference, false);
            self.bus.publish(
                Event::new(EventKind::RequestReleased)
                    .with_request(id)
                    .with_preference(preference)
                    .with_reason("unfulfilled")
                    .with_stats(state.stats),
            );
            return Err(FulfillRejected {
                core,
                error: CoreError::Detached { id },
            });
        }

        state.stats.record_fulfilled(preference);
        let mut ev = Event::new(EventKind::RequestFulfilled)
            .with_request(id)
            .with_preference(preference)
            .with_stats(state.stats);
        if let Some(provider) = provider {
            ev = ev.with_provider(provider);
        }
        self.bus.publish(ev);
        Ok(())
    }
}

/// Registry of live requests.
///
/// A cheap `Clone` handle; clones share the same registry.
pub struct RequestCollection<C: WorkerCore> {
    shared: Arc<Shared<C>>,
}

impl<C: WorkerCore> Clone for RequestCollection<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: WorkerCore> RequestCollection<C> {
    /// Creates an empty registry publishing on `bus`.
    pub fn new(bus: Bus) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    requests: BTreeMap::new(),
                    stats: RequestStatistics::default(),
                    next_id: 1,
                }),
                bus,
            }),
        }
    }

    /// Registers an unfulfilled request and returns its handle. Never blocks.
    pub fn create_unfulfilled_request(&self, preference: CorePreference) -> WorkerCoreRequest<C> {
        let (tx, rx) = oneshot::channel();
        let requested_at = Instant::now();

        let mut state = self.shared.state.lock();
        let id = RequestId::from_raw(state.next_id);
        state.next_id += 1;
        state.requests.insert(
            id,
            Entry {
                preference,
                requested_at,
                delivery: Some(tx),
            },
        );
        state.stats.record_created(preference);
        self.shared.bus.publish(
            Event::new(EventKind::RequestCreated)
                .with_request(id)
                .with_preference(preference)
                .with_stats(state.stats),
        );
        drop(state);

        WorkerCoreRequest::new(id, preference, requested_at, Arc::clone(&self.shared), rx)
    }

    /// Registers a request and waits until a core is attached to it.
    ///
    /// # Errors
    /// [`CoreError::Cancelled`] if `cancel` fires first. The request is released before
    /// returning, so the counters are back to their previous values and a core that
    /// arrived concurrently has been returned to its provider.
    pub async fn create_fulfilled_request(
        &self,
        preference: CorePreference,
        cancel: &CancellationToken,
    ) -> Result<WorkerCoreRequest<C>, CoreError> {
        let mut request = self.create_unfulfilled_request(preference);
        request.wait_for_core(cancel).await?;
        Ok(request)
    }

    /// Attaches `core` to the request `id`.
    ///
    /// # Errors
    /// Unknown or already-fulfilled requests are rejected and the core is handed back
    /// inside [`FulfillRejected`].
    pub fn fulfill_request(&self, id: RequestId, core: C) -> Result<(), FulfillRejected<C>> {
        let mut state = self.shared.state.lock();
        self.shared.attach(&mut state, id, core, None)
    }

    /// Attaches `core` to the oldest unfulfilled request accepted by `eligible`.
    ///
    /// Selection and attachment happen under one lock. Returns the core when no
    /// request qualifies.
    pub fn fulfill_oldest<F>(&self, core: C, eligible: F) -> Result<RequestId, C>
    where
        F: FnMut(&PendingRequest) -> bool,
    {
        self.fulfill_oldest_from(core, None, eligible)
    }

    pub(crate) fn fulfill_oldest_from<F>(
        &self,
        mut core: C,
        provider: Option<&str>,
        mut eligible: F,
    ) -> Result<RequestId, C>
    where
        F: FnMut(&PendingRequest) -> bool,
    {
        let mut state = self.shared.state.lock();
        let candidates: Vec<RequestId> = state
            .requests
            .iter()
            .filter(|(_, entry)| !entry.is_fulfilled())
            .map(|(id, entry)| PendingRequest {
                id: *id,
                preference: entry.preference,
                requested_at: entry.requested_at,
            })
            .filter(|pending| eligible(pending))
            .map(|pending| pending.id)
            .collect();

        for id in candidates {
            match self.shared.attach(&mut state, id, core, provider) {
                Ok(()) => return Ok(id),
                Err(rejected) => core = rejected.core,
            }
        }
        Err(core)
    }

    /// Unfulfilled requests, oldest first.
    pub fn unfulfilled(&self) -> Vec<PendingRequest> {
        self.shared
            .state
            .lock()
            .requests
            .iter()
            .filter(|(_, entry)| !entry.is_fulfilled())
            .map(|(id, entry)| PendingRequest {
                id: *id,
                preference: entry.preference,
                requested_at: entry.requested_at,
            })
            .collect()
    }

    /// Point-in-time counters.
    pub fn statistics(&self) -> RequestStatistics {
        self.shared.state.lock().stats
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.shared.state.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().requests.is_empty()
    }

    /// Receiver for events published on this registry's bus.
    ///
    /// Request transitions satisfy [`Event::is_request_change`].
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.shared.bus
    }
}
