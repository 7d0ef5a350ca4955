//! # Multi-source fulfiller.
//!
//! Binds a [`ProviderCollection`] (usually the remote build agents) to a request
//! registry. Each provider gets one slot; a slot is idle, obtaining (exactly one
//! `request_core` in flight) or holding an obtained core. Many providers are therefore
//! asked in parallel, and whichever answers first serves the oldest request it may.
//!
//! ## Pass
//! ```text
//! wake ──► reconcile slots with the provider snapshot (removed ⇒ cancel / drop)
//!      ──► held cores: fulfill_oldest, else keep holding
//!      ──► target = servable pending + headroom (0 when nothing is servable)
//!      ──► supply < target ⇒ start idle useful providers (shuffled, local first
//!                           when local-only requests wait)
//!      ──► supply > target ⇒ cancel obtainments / drop held cores, least useful first
//!      ──► idle until: registry change | provider change | obtain finished | due | cancel
//! ```
//!
//! Each obtain task calls `request_core` and then checks the core's liveness. A dead core is
//! dropped in the task, the slot goes back to idle and `DyingCoreDiscarded` is
//! published; a check that hangs only stalls its own provider's slot.
//!
//! A `RequireLocal` request with no local provider in the collection is not servable:
//! it stays unfulfilled without driving any obtainment.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::cores::WorkerCore;
use crate::events::{Bus, Event, EventKind};
use crate::providers::{ProviderCollection, ProviderRef};
use crate::requests::{PendingRequest, RequestCollection};

use super::eligibility::{Eligibility, Verdict, earliest};
use super::handle::LoopHandle;
use super::obtain::{Obtained, obtain_live};
use super::wakeup::Wakeup;

enum SlotStatus<C> {
    Idle,
    Obtaining {
        generation: u64,
        cancel: CancellationToken,
    },
    Holding(C),
}

struct ProviderSlot<C: WorkerCore> {
    provider: ProviderRef<C>,
    eligibility: Eligibility,
    status: SlotStatus<C>,
    failures: u32,
    retry_at: Option<Instant>,
}

struct SlotTable<C: WorkerCore> {
    slots: HashMap<Arc<str>, ProviderSlot<C>>,
    next_generation: u64,
    closed: bool,
}

/// Work collected under the lock and finished after releasing it.
struct Release<C> {
    cores: Vec<C>,
    cancelled: Vec<Arc<str>>,
}

impl<C> Release<C> {
    fn new() -> Self {
        Self {
            cores: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    /// Resets `status` to idle, keeping whatever must be cancelled or dropped.
    fn take(&mut self, id: &Arc<str>, status: &mut SlotStatus<C>) {
        match std::mem::replace(status, SlotStatus::Idle) {
            SlotStatus::Idle => {}
            SlotStatus::Obtaining { cancel, .. } => {
                cancel.cancel();
                self.cancelled.push(Arc::clone(id));
            }
            SlotStatus::Holding(core) => self.cores.push(core),
        }
    }

    fn finish(self, bus: &Bus) {
        for id in self.cancelled {
            bus.publish(Event::new(EventKind::ObtainmentCancelled).with_provider(id));
        }
        drop(self.cores);
    }
}

struct Inner<C: WorkerCore> {
    requests: RequestCollection<C>,
    providers: ProviderCollection<C>,
    cfg: Config,
    bus: Bus,
    table: Mutex<SlotTable<C>>,
    notify: Arc<Notify>,
    token: CancellationToken,
    tracker: TaskTracker,
}

/// Background loop feeding cores from a dynamic provider set to a request registry.
///
/// Dropping the fulfiller cancels the loop; [`shutdown`](Self::shutdown) also waits
/// until every obtained core has been attached or returned.
pub struct MultipleSourceFulfiller<C: WorkerCore> {
    handle: LoopHandle,
    _core: PhantomData<fn() -> C>,
}

impl<C: WorkerCore> MultipleSourceFulfiller<C> {
    /// Starts the loop. Must be called inside a Tokio runtime.
    ///
    /// Providers added to `providers` later are picked up automatically.
    pub fn start(
        requests: RequestCollection<C>,
        providers: ProviderCollection<C>,
        cfg: &Config,
    ) -> Self {
        let token = CancellationToken::new();
        let notify = Arc::new(Notify::new());
        let bus = requests.bus().clone();
        let wakeup = Wakeup::new(bus.subscribe(), Arc::clone(&notify));
        // Provider events only need their own receiver when they travel on another bus.
        let provider_wakeup = (!providers.bus().same_channel(&bus))
            .then(|| Wakeup::new(providers.bus().subscribe(), Arc::clone(&notify)));

        let inner = Arc::new(Inner {
            requests,
            providers,
            cfg: cfg.clone(),
            bus,
            table: Mutex::new(SlotTable {
                slots: HashMap::new(),
                next_generation: 0,
                closed: false,
            }),
            notify,
            token: token.clone(),
            tracker: TaskTracker::new(),
        });

        Self {
            handle: LoopHandle::spawn(
                "multi-source".to_string(),
                token,
                inner.run(wakeup, provider_wakeup),
            ),
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

    /// Stops the loop, cancels obtainments and returns every held core.
    pub async fn shutdown(mut self) {
        self.handle.cancel();
        self.handle.join().await;
    }

    pub(crate) fn handle_mut(&mut self) -> &mut LoopHandle {
        &mut self.handle
    }
}

impl<C: WorkerCore> Inner<C> {
    async fn run(self: Arc<Self>, mut wakeup: Wakeup, mut provider_wakeup: Option<Wakeup>) {
        debug!(fulfiller = "multi-source", "fulfiller started");
        self.bus
            .publish(Event::new(EventKind::FulfillerStarted).with_reason("multi-source"));

        loop {
            let next = self.pass();
            let woken = match provider_wakeup.as_mut() {
                Some(provider_wakeup) => tokio::select! {
                    woken = wakeup.wait(&self.token, next) => woken,
                    woken = provider_wakeup.wait(&self.token, next) => woken,
                },
                None => wakeup.wait(&self.token, next).await,
            };
            if !woken {
                break;
            }
        }

        self.stop().await;
        debug!(fulfiller = "multi-source", "fulfiller stopped");
        self.bus
            .publish(Event::new(EventKind::FulfillerStopped).with_reason("multi-source"));
    }

    fn pass(self: &Arc<Self>) -> Option<Duration> {
        self.reconcile();
        self.attach_held();
        self.balance()
    }

    /// Brings the slot table in line with the provider collection.
    fn reconcile(&self) {
        let providers = self.providers.snapshot();
        let mut release = Release::new();
        {
            let mut table = self.table.lock();
            if table.closed {
                return;
            }
            table.slots.retain(|id, slot| {
                let keep = providers
                    .iter()
                    .any(|p| p.id() == &**id && Arc::ptr_eq(p, &slot.provider));
                if !keep {
                    debug!(provider = %id, "provider left, releasing its slot");
                    release.take(id, &mut slot.status);
                }
                keep
            });
            for provider in providers {
                if !table.slots.contains_key(provider.id()) {
                    let id: Arc<str> = Arc::from(provider.id());
                    let eligibility = Eligibility::new(provider.locality(), &self.cfg);
                    table.slots.insert(
                        id,
                        ProviderSlot {
                            provider,
                            eligibility,
                            status: SlotStatus::Idle,
                            failures: 0,
                            retry_at: None,
                        },
                    );
                }
            }
        }
        release.finish(&self.bus);
    }

    /// Attaches held cores to the oldest requests their providers may serve.
    fn attach_held(&self) {
        let held: Vec<(Arc<str>, Eligibility, C)> = {
            let mut table = self.table.lock();
            table
                .slots
                .iter_mut()
                .filter(|(_, slot)| matches!(slot.status, SlotStatus::Holding(_)))
                .filter_map(|(id, slot)| {
                    match std::mem::replace(&mut slot.status, SlotStatus::Idle) {
                        SlotStatus::Holding(core) => Some((Arc::clone(id), slot.eligibility, core)),
                        other => {
                            slot.status = other;
                            None
                        }
                    }
                })
                .collect()
        };

        for (id, eligibility, core) in held {
            let now = Instant::now();
            match self.requests.fulfill_oldest_from(core, Some(&*id), |pending| {
                eligibility.accepts(pending, now)
            }) {
                Ok(request) => trace!(provider = %id, request = %request, "core attached"),
                Err(core) => self.hold(&id, core),
            }
        }
    }

    /// Puts an unattached core back into its slot, or drops it if the slot moved on.
    fn hold(&self, id: &Arc<str>, core: C) {
        let mut table = self.table.lock();
        if !table.closed {
            if let Some(slot) = table.slots.get_mut(id) {
                if matches!(slot.status, SlotStatus::Idle) {
                    slot.status = SlotStatus::Holding(core);
                    return;
                }
            }
        }
        drop(table);
        drop(core);
    }

    /// Starts or cancels obtainments so supply tracks demand. Returns the next due time.
    fn balance(self: &Arc<Self>) -> Option<Duration> {
        let pending = self.requests.unfulfilled();
        let now = Instant::now();
        let mut next = None;
        let mut release = Release::new();
        let mut started = Vec::new();

        {
            let mut table = self.table.lock();
            if table.closed {
                return None;
            }

            // Demand: requests at least one registered provider may ever serve.
            let mut servable = 0usize;
            let mut local_only_waiting = false;
            for request in &pending {
                let mut compatible = false;
                for slot in table.slots.values() {
                    let verdict = slot.eligibility.judge(request, now);
                    if let Verdict::Deferred(due) = verdict {
                        next = earliest(next, due);
                    }
                    compatible |= verdict.is_compatible();
                }
                if compatible {
                    servable += 1;
                    local_only_waiting |= request.preference.is_local_class();
                }
            }
            let target = if servable == 0 {
                0
            } else {
                servable + self.cfg.obtainment_headroom
            };
            let mut supply = table
                .slots
                .values()
                .filter(|slot| !matches!(slot.status, SlotStatus::Idle))
                .count();

            if supply < target {
                let mut candidates: Vec<(Arc<str>, bool)> = Vec::new();
                for (id, slot) in table.slots.iter_mut() {
                    if !matches!(slot.status, SlotStatus::Idle) {
                        continue;
                    }
                    match slot.retry_at {
                        Some(at) if at > now => {
                            next = earliest(next, at - now);
                            continue;
                        }
                        Some(_) => slot.retry_at = None,
                        None => {}
                    }
                    if usefulness(&slot.eligibility, &pending, now) > 0 {
                        candidates.push((Arc::clone(id), slot.eligibility.locality().is_local()));
                    }
                }

                candidates.shuffle(&mut rand::rng());
                if local_only_waiting {
                    candidates.sort_by_key(|(_, local)| !*local);
                }

                for (id, _) in candidates {
                    if supply >= target {
                        break;
                    }
                    let generation = table.next_generation;
                    table.next_generation += 1;
                    let Some(slot) = table.slots.get_mut(&id) else {
                        continue;
                    };
                    let cancel = self.token.child_token();
                    slot.status = SlotStatus::Obtaining {
                        generation,
                        cancel: cancel.clone(),
                    };
                    started.push((id, Arc::clone(&slot.provider), generation, cancel));
                    supply += 1;
                }
            } else if supply > target {
                let mut busy: Vec<(Arc<str>, bool, usize)> = table
                    .slots
                    .iter()
                    .filter(|(_, slot)| !matches!(slot.status, SlotStatus::Idle))
                    .map(|(id, slot)| {
                        let holding = matches!(slot.status, SlotStatus::Holding(_));
                        (
                            Arc::clone(id),
                            holding,
                            usefulness(&slot.eligibility, &pending, now),
                        )
                    })
                    .collect();
                // Least useful first; in-flight obtainments go before ready cores.
                busy.sort_by_key(|(_, holding, useful)| (*useful, *holding));

                for (id, _, _) in busy.into_iter().take(supply - target) {
                    if let Some(slot) = table.slots.get_mut(&id) {
                        release.take(&id, &mut slot.status);
                    }
                }
            }
        }

        release.finish(&self.bus);
        for (id, provider, generation, cancel) in started {
            self.spawn_obtain(id, provider, generation, cancel);
        }
        next
    }

    fn spawn_obtain(
        self: &Arc<Self>,
        id: Arc<str>,
        provider: ProviderRef<C>,
        generation: u64,
        cancel: CancellationToken,
    ) {
        self.bus
            .publish(Event::new(EventKind::ObtainmentStarted).with_provider(Arc::clone(&id)));
        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            let outcome = obtain_live(&*provider, &cancel).await;
            inner.obtained(&id, generation, outcome);
        });
    }

    fn obtained(&self, id: &Arc<str>, generation: u64, outcome: Obtained<C>) {
        let mut table = self.table.lock();
        let current = !table.closed
            && matches!(
                table.slots.get(id).map(|slot| &slot.status),
                Some(SlotStatus::Obtaining { generation: g, .. }) if *g == generation
            );
        let slot = match table.slots.get_mut(id) {
            Some(slot) if current => slot,
            _ => {
                // Cancelled, removed or shut down meanwhile: whatever arrived goes back.
                drop(table);
                drop(outcome);
                return;
            }
        };

        match outcome {
            Obtained::Core(core) => {
                slot.failures = 0;
                slot.status = SlotStatus::Holding(core);
                self.bus
                    .publish(Event::new(EventKind::CoreObtained).with_provider(Arc::clone(id)));
            }
            Obtained::Dead => {
                slot.status = SlotStatus::Idle;
                debug!(provider = %id, "discarding dying core");
                self.bus
                    .publish(Event::new(EventKind::DyingCoreDiscarded).with_provider(Arc::clone(id)));
            }
            Obtained::Failed(err) if err.is_cancellation() => slot.status = SlotStatus::Idle,
            Obtained::Failed(err) => {
                slot.status = SlotStatus::Idle;
                slot.failures = slot.failures.saturating_add(1);
                let delay = self.cfg.provider_backoff.next(slot.failures);
                slot.retry_at = Some(Instant::now() + delay);
                warn!(
                    provider = %id,
                    err = %err,
                    failures = slot.failures,
                    retry_in = ?delay,
                    "provider failed to supply a core"
                );
                self.bus.publish(
                    Event::new(EventKind::ProviderFailed)
                        .with_provider(Arc::clone(id))
                        .with_reason(err.as_message())
                        .with_delay(delay),
                );
            }
        }
        drop(table);
        self.notify.notify_one();
    }

    async fn stop(&self) {
        let mut release = Release::new();
        {
            let mut table = self.table.lock();
            table.closed = true;
            for (id, slot) in table.slots.iter_mut() {
                release.take(id, &mut slot.status);
            }
        }
        release.finish(&self.bus);

        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Number of pending requests a provider may serve right now.
fn usefulness(eligibility: &Eligibility, pending: &[PendingRequest], now: Instant) -> usize {
    pending
        .iter()
        .filter(|request| eligibility.accepts(request, now))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cores::{CoreLocality, CorePreference};
    use crate::providers::{SemaphoreCoreProvider, SlotCore};

    fn setup() -> (RequestCollection<SlotCore>, ProviderCollection<SlotCore>) {
        let bus = Bus::new(1024);
        (RequestCollection::new(bus.clone()), ProviderCollection::new(bus))
    }

    #[tokio::test]
    async fn providers_added_after_start_are_used() {
        let (requests, providers) = setup();
        let fulfiller =
            MultipleSourceFulfiller::start(requests.clone(), providers.clone(), &Config::default());

        let waiter = {
            let requests = requests.clone();
            tokio::spawn(async move {
                let request = requests
                    .create_fulfilled_request(CorePreference::PreferLocal, &CancellationToken::new())
                    .await
                    .unwrap();
                request.release();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(requests.statistics().unfulfilled(), 1);

        let agent = SemaphoreCoreProvider::arc("agent-1", CoreLocality::Remote, 1);
        providers.add(agent.clone()).unwrap();
        waiter.await.unwrap();

        fulfiller.shutdown().await;
        assert_eq!(agent.available(), 1);
    }

    #[tokio::test]
    async fn local_only_request_does_not_starve_others() {
        let (requests, providers) = setup();
        let agent = SemaphoreCoreProvider::arc("agent-1", CoreLocality::Remote, 1);
        providers.add(agent.clone()).unwrap();
        let fulfiller =
            MultipleSourceFulfiller::start(requests.clone(), providers.clone(), &Config::default());

        let pinned = requests.create_unfulfilled_request(CorePreference::RequireLocal);
        let token = CancellationToken::new();
        for _ in 0..3 {
            let request = requests
                .create_fulfilled_request(CorePreference::PreferRemote, &token)
                .await
                .unwrap();
            request.release();
        }
        assert_eq!(requests.statistics().unfulfilled_local, 1);

        drop(pinned);
        fulfiller.shutdown().await;
        assert_eq!(agent.available(), 1);
    }

    #[tokio::test]
    async fn removed_provider_gives_back_held_core() {
        let (requests, providers) = setup();
        let agent = SemaphoreCoreProvider::arc("agent-1", CoreLocality::Remote, 1);
        let fallback = SemaphoreCoreProvider::arc("agent-2", CoreLocality::Remote, 1);
        providers.add(agent.clone()).unwrap();
        let fulfiller =
            MultipleSourceFulfiller::start(requests.clone(), providers.clone(), &Config::default());

        let request = requests
            .create_fulfilled_request(CorePreference::PreferRemote, &CancellationToken::new())
            .await
            .unwrap();
        request.release();

        providers.remove("agent-1");
        providers.add(fallback.clone()).unwrap();
        let request = requests
            .create_fulfilled_request(CorePreference::PreferRemote, &CancellationToken::new())
            .await
            .unwrap();
        request.release();

        fulfiller.shutdown().await;
        assert_eq!(agent.available(), 1);
        assert_eq!(fallback.available(), 1);
        assert!(fallback.issued() >= 1);
    }

    /// Core whose liveness check either answers at once or hangs until cancelled.
    struct AgentCore {
        hangs: bool,
        _permit: tokio::sync::OwnedSemaphorePermit,
    }

    #[async_trait::async_trait]
    impl crate::cores::CoreLiveness for AgentCore {
        async fn is_alive(&self, cancel: &CancellationToken) -> bool {
            if self.hangs {
                cancel.cancelled().await;
                return false;
            }
            true
        }
    }

    impl WorkerCore for AgentCore {
        fn liveness(&self) -> Option<&dyn crate::cores::CoreLiveness> {
            Some(self)
        }
    }

    struct Agent {
        id: &'static str,
        hangs: bool,
        slots: Arc<tokio::sync::Semaphore>,
    }

    impl Agent {
        fn arc(id: &'static str, capacity: usize, hangs: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                hangs,
                slots: Arc::new(tokio::sync::Semaphore::new(capacity)),
            })
        }
    }

    #[async_trait::async_trait]
    impl crate::providers::WorkerCoreProvider<AgentCore> for Agent {
        fn id(&self) -> &str {
            self.id
        }

        fn locality(&self) -> CoreLocality {
            CoreLocality::Remote
        }

        async fn request_core(
            &self,
            cancel: &CancellationToken,
        ) -> Result<AgentCore, crate::error::CoreError> {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(crate::error::CoreError::Cancelled),
                permit = Arc::clone(&self.slots).acquire_owned() => permit,
            };
            let permit = permit.map_err(|_| crate::error::CoreError::ProviderClosed {
                id: self.id.to_string(),
            })?;
            Ok(AgentCore {
                hangs: self.hangs,
                _permit: permit,
            })
        }
    }

    #[tokio::test]
    async fn hanging_liveness_check_does_not_block_other_providers() {
        let bus = Bus::new(1024);
        let requests = RequestCollection::<AgentCore>::new(bus.clone());
        let providers = ProviderCollection::new(bus);
        let slow = Agent::arc("slow", 1, true);
        providers.add(slow.clone()).unwrap();
        let fulfiller =
            MultipleSourceFulfiller::start(requests.clone(), providers.clone(), &Config::default());

        let first = requests.create_unfulfilled_request(CorePreference::PreferRemote);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(slow.slots.available_permits(), 0);

        let fast = Agent::arc("fast", 50, false);
        providers.add(fast.clone()).unwrap();
        let second = requests.create_unfulfilled_request(CorePreference::PreferRemote);

        tokio::time::timeout(Duration::from_secs(2), async {
            while requests.statistics().fulfilled() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fast agent served both requests");

        fulfiller.shutdown().await;
        drop((first, second));
        assert_eq!(slow.slots.available_permits(), 1);
        assert_eq!(fast.slots.available_permits(), 50);
    }

    #[tokio::test]
    async fn idle_pool_obtains_nothing() {
        let (requests, providers) = setup();
        let agent = SemaphoreCoreProvider::arc("agent-1", CoreLocality::Remote, 4);
        providers.add(agent.clone()).unwrap();
        let fulfiller =
            MultipleSourceFulfiller::start(requests.clone(), providers.clone(), &Config::default());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(agent.issued(), 0);
        fulfiller.shutdown().await;
    }
}
