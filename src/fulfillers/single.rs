//! # Single-source fulfiller.
//!
//! Binds one provider (typically the local machine) to a request registry. The loop
//! keeps as many `request_core` calls in flight as there are eligible unfulfilled
//! requests, and attaches each obtained core to the oldest eligible request.
//!
//! ## Pass
//! ```text
//! wake ──► attach ready cores (fulfill_oldest; checked already by their obtain task)
//!      ──► drop ready cores nobody can use anymore
//!      ──► demand = eligible pending - (in flight + ready)
//!            ├─ > 0 ─► spawn `demand` obtain tasks (TaskTracker)
//!            └─ < 0 ─► cancel the newest obtain tasks
//!      ──► idle until: registry change | obtain finished | deferral/retry due | cancel
//! ```
//!
//! Provider errors put the fulfiller in backoff (`Config::provider_backoff`) for the
//! provider; nothing is surfaced to request callers.

use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::cores::WorkerCore;
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;
use crate::providers::ProviderRef;
use crate::requests::RequestCollection;

use super::eligibility::{Eligibility, Verdict, earliest};
use super::handle::LoopHandle;
use super::obtain::{Obtained, obtain_live};
use super::wakeup::Wakeup;

struct Queue<C> {
    ready: VecDeque<C>,
    /// In-flight obtainments by spawn order; the token cancels that one call.
    obtains: BTreeMap<u64, CancellationToken>,
    next_obtain: u64,
    failures: u32,
    retry_at: Option<Instant>,
    closed: bool,
}

struct Inner<C: WorkerCore> {
    requests: RequestCollection<C>,
    provider: ProviderRef<C>,
    provider_id: Arc<str>,
    eligibility: Eligibility,
    backoff: BackoffPolicy,
    bus: Bus,
    queue: Mutex<Queue<C>>,
    notify: Arc<Notify>,
    token: CancellationToken,
    tracker: TaskTracker,
}

/// Background loop feeding one provider's cores to a request registry.
///
/// Dropping the fulfiller cancels the loop; [`shutdown`](Self::shutdown) also waits
/// until every obtained core has been attached or returned.
pub struct SingleSourceFulfiller<C: WorkerCore> {
    handle: LoopHandle,
    _core: PhantomData<fn() -> C>,
}

impl<C: WorkerCore> SingleSourceFulfiller<C> {
    /// Starts the loop. Must be called inside a Tokio runtime.
    pub fn start(requests: RequestCollection<C>, provider: ProviderRef<C>, cfg: &Config) -> Self {
        let token = CancellationToken::new();
        let provider_id: Arc<str> = Arc::from(provider.id());
        let bus = requests.bus().clone();
        let notify = Arc::new(Notify::new());
        let wakeup = Wakeup::new(bus.subscribe(), Arc::clone(&notify));

        let inner = Arc::new(Inner {
            eligibility: Eligibility::new(provider.locality(), cfg),
            backoff: cfg.provider_backoff,
            requests,
            provider,
            provider_id: Arc::clone(&provider_id),
            bus,
            queue: Mutex::new(Queue {
                ready: VecDeque::new(),
                obtains: BTreeMap::new(),
                next_obtain: 0,
                failures: 0,
                retry_at: None,
                closed: false,
            }),
            notify,
            token: token.clone(),
            tracker: TaskTracker::new(),
        });

        let name = format!("single-source:{provider_id}");
        Self {
            handle: LoopHandle::spawn(name, token, inner.run(wakeup)),
            _core: PhantomData,
        }
    }

    /// Fulfiller name used in logs, events and shutdown reports.
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the loop, cancels obtainments and returns every unattached core.
    pub async fn shutdown(mut self) {
        self.handle.cancel();
        self.handle.join().await;
    }

    pub(crate) fn handle_mut(&mut self) -> &mut LoopHandle {
        &mut self.handle
    }
}

impl<C: WorkerCore> Inner<C> {
    async fn run(self: Arc<Self>, mut wakeup: Wakeup) {
        let name = format!("single-source:{}", self.provider_id);
        debug!(fulfiller = %name, "fulfiller started");
        self.bus
            .publish(Event::new(EventKind::FulfillerStarted).with_reason(name.as_str()));

        loop {
            let next = self.pass();
            if !wakeup.wait(&self.token, next).await {
                break;
            }
        }

        self.stop().await;
        debug!(fulfiller = %name, "fulfiller stopped");
        self.bus
            .publish(Event::new(EventKind::FulfillerStopped).with_reason(name));
    }

    /// One matching pass. Returns how long until a deferred request or a provider
    /// retry becomes due, if any.
    fn pass(self: &Arc<Self>) -> Option<Duration> {
        self.attach_ready();

        let now = Instant::now();
        let mut eligible = 0usize;
        let mut deferred = 0usize;
        let mut next = None;
        for pending in self.requests.unfulfilled() {
            match self.eligibility.judge(&pending, now) {
                Verdict::Eligible => eligible += 1,
                Verdict::Deferred(due) => {
                    deferred += 1;
                    next = earliest(next, due);
                }
                Verdict::Incompatible => {}
            }
        }

        let mut surplus = Vec::new();
        let to_spawn = {
            let mut q = self.queue.lock();

            // Cores and obtainments beyond what could ever be attached go back.
            let wanted = eligible + deferred;
            while q.ready.len() > wanted {
                if let Some(core) = q.ready.pop_back() {
                    surplus.push(core);
                }
            }
            while q.ready.len() + q.obtains.len() > wanted {
                let Some((_, cancel)) = q.obtains.pop_last() else {
                    break;
                };
                cancel.cancel();
                self.bus.publish(
                    Event::new(EventKind::ObtainmentCancelled)
                        .with_provider(Arc::clone(&self.provider_id)),
                );
            }

            let backing_off = match q.retry_at {
                Some(at) if at > now => {
                    next = earliest(next, at - now);
                    true
                }
                Some(_) => {
                    q.retry_at = None;
                    false
                }
                None => false,
            };
            if backing_off {
                0
            } else {
                eligible.saturating_sub(q.ready.len() + q.obtains.len())
            }
        };
        if !surplus.is_empty() {
            trace!(provider = %self.provider_id, count = surplus.len(), "returning unused cores");
        }
        drop(surplus);

        for _ in 0..to_spawn {
            self.spawn_obtain();
        }
        next
    }

    /// Attaches obtained cores to the oldest eligible requests.
    fn attach_ready(&self) {
        loop {
            let Some(core) = self.queue.lock().ready.pop_front() else {
                return;
            };

            let now = Instant::now();
            let eligibility = self.eligibility;
            match self.requests.fulfill_oldest_from(
                core,
                Some(&*self.provider_id),
                |pending| eligibility.accepts(pending, now),
            ) {
                Ok(id) => trace!(provider = %self.provider_id, request = %id, "core attached"),
                Err(core) => {
                    let mut q = self.queue.lock();
                    if q.closed {
                        drop(q);
                        drop(core);
                    } else {
                        q.ready.push_front(core);
                    }
                    return;
                }
            }
        }
    }

    fn spawn_obtain(self: &Arc<Self>) {
        let cancel = self.token.child_token();
        let key = {
            let mut q = self.queue.lock();
            let key = q.next_obtain;
            q.next_obtain += 1;
            q.obtains.insert(key, cancel.clone());
            key
        };
        self.bus.publish(
            Event::new(EventKind::ObtainmentStarted).with_provider(Arc::clone(&self.provider_id)),
        );

        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            let outcome = obtain_live(&*inner.provider, &cancel).await;
            inner.obtained(key, outcome);
        });
    }

    fn obtained(&self, key: u64, outcome: Obtained<C>) {
        let mut q = self.queue.lock();
        q.obtains.remove(&key);
        if q.closed {
            drop(q);
            drop(outcome);
            return;
        }

        match outcome {
            Obtained::Core(core) => {
                q.failures = 0;
                q.ready.push_back(core);
                self.bus.publish(
                    Event::new(EventKind::CoreObtained)
                        .with_provider(Arc::clone(&self.provider_id)),
                );
            }
            Obtained::Dead => {
                debug!(provider = %self.provider_id, "discarding dying core");
                self.bus.publish(
                    Event::new(EventKind::DyingCoreDiscarded)
                        .with_provider(Arc::clone(&self.provider_id)),
                );
            }
            Obtained::Failed(err) if err.is_cancellation() => {}
            Obtained::Failed(err) => {
                q.failures = q.failures.saturating_add(1);
                let delay = self.backoff.next(q.failures);
                q.retry_at = Some(Instant::now() + delay);
                warn!(
                    provider = %self.provider_id,
                    err = %err,
                    failures = q.failures,
                    retry_in = ?delay,
                    "provider failed to supply a core"
                );
                self.bus.publish(
                    Event::new(EventKind::ProviderFailed)
                        .with_provider(Arc::clone(&self.provider_id))
                        .with_reason(err.as_message())
                        .with_delay(delay),
                );
            }
        }
        drop(q);
        self.notify.notify_one();
    }

    async fn stop(&self) {
        let leftovers = {
            let mut q = self.queue.lock();
            q.closed = true;
            for (_, cancel) in std::mem::take(&mut q.obtains) {
                cancel.cancel();
            }
            std::mem::take(&mut q.ready)
        };
        drop(leftovers);

        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cores::{CoreLocality, CorePreference};
    use crate::providers::{SemaphoreCoreProvider, SlotCore};

    fn setup(capacity: usize) -> (RequestCollection<SlotCore>, Arc<SemaphoreCoreProvider>) {
        let requests = RequestCollection::new(Bus::new(256));
        let provider = SemaphoreCoreProvider::arc("local", CoreLocality::Local, capacity);
        (requests, provider)
    }

    #[tokio::test]
    async fn sequential_requests_on_one_slot() {
        let (requests, provider) = setup(1);
        let fulfiller = SingleSourceFulfiller::start(
            requests.clone(),
            provider.clone(),
            &Config::default(),
        );
        let token = CancellationToken::new();

        for _ in 0..5 {
            let request = requests
                .create_fulfilled_request(CorePreference::PreferLocal, &token)
                .await
                .unwrap();
            assert_eq!(requests.statistics().fulfilled(), 1);
            request.release();
        }

        fulfiller.shutdown().await;
        assert_eq!(provider.available(), 1);
        assert!(requests.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_requests_never_exceed_capacity() {
        let (requests, provider) = setup(2);
        let fulfiller = SingleSourceFulfiller::start(
            requests.clone(),
            provider.clone(),
            &Config::default(),
        );

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let requests = requests.clone();
            tasks.push(tokio::spawn(async move {
                let request = requests
                    .create_fulfilled_request(CorePreference::RequireLocal, &CancellationToken::new())
                    .await
                    .unwrap();
                assert!(requests.statistics().fulfilled() <= 2);
                tokio::task::yield_now().await;
                request.release();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        fulfiller.shutdown().await;
        assert_eq!(provider.available(), 2);
        assert!(provider.issued() >= 20);
    }

    #[tokio::test]
    async fn shutdown_returns_capacity_of_pending_obtains() {
        let (requests, provider) = setup(1);
        let fulfiller = SingleSourceFulfiller::start(
            requests.clone(),
            provider.clone(),
            &Config::default(),
        );
        let token = CancellationToken::new();

        let held = requests
            .create_fulfilled_request(CorePreference::PreferLocal, &token)
            .await
            .unwrap();
        // Second request keeps an obtainment blocked on the only slot.
        let waiting = requests.create_unfulfilled_request(CorePreference::PreferLocal);
        tokio::time::sleep(Duration::from_millis(20)).await;

        fulfiller.shutdown().await;
        held.release();
        drop(waiting);
        assert_eq!(provider.available(), 1);
        assert_eq!(requests.statistics().total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn local_provider_waits_out_the_remote_delay() {
        let (requests, provider) = setup(1);
        let cfg = Config {
            remote_delay: Duration::from_millis(300),
            ..Config::default()
        };
        let fulfiller = SingleSourceFulfiller::start(requests.clone(), provider.clone(), &cfg);

        let started = tokio::time::Instant::now();
        let request = requests
            .create_fulfilled_request(CorePreference::PreferRemote, &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));

        request.release();
        fulfiller.shutdown().await;
        assert_eq!(provider.available(), 1);
    }
}
