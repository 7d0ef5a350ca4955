//! # WorkerPool: reserves cores for the dispatcher.
//!
//! The [`WorkerPool`] owns the event bus, one [`RequestCollection`], an optional local
//! [`SingleSourceFulfiller`], the remote [`ProviderCollection`] with its
//! [`MultipleSourceFulfiller`], and the [`SubscriberSet`] fed from the bus.
//!
//! ## Shutdown
//! ```text
//! shutdown()
//!   ├─► cancel every fulfiller loop
//!   ├─► wait up to Config::grace for them to return their cores
//!   │      ├─ Ok        → continue
//!   │      └─ timeout   → RuntimeError::GraceExceeded { stuck }
//!   └─► stop the subscriber listener (drains queued events first)
//! ```
//!
//! ## Example
//! ```rust
//! use corevisor::{
//!     Config, CoreLocality, CorePreference, ProviderRef, SemaphoreCoreProvider, SlotCore,
//!     WorkerPool,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent: ProviderRef<SlotCore> =
//!         SemaphoreCoreProvider::arc("agent-1", CoreLocality::Remote, 4);
//!     let pool = WorkerPool::<SlotCore>::builder(Config::default())
//!         .with_local_provider(SemaphoreCoreProvider::arc("local", CoreLocality::Local, 2))
//!         .with_remote_providers(vec![agent])
//!         .build()?;
//!
//!     let token = CancellationToken::new();
//!     let mut request = pool.reserve_core(CorePreference::PreferRemote, &token).await?;
//!     let core = request.wait_for_core(&token).await?;
//!     println!("running on {}", core.provider());
//!     request.release();
//!
//!     pool.shutdown().await?;
//!     Ok(())
//! }
//! ```

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::cores::{CorePreference, WorkerCore};
use crate::error::{CoreError, RuntimeError};
use crate::events::{Bus, Event};
use crate::fulfillers::{LoopHandle, MultipleSourceFulfiller, SingleSourceFulfiller};
use crate::providers::{ProviderCollection, ProviderRef};
use crate::requests::{RequestCollection, RequestStatistics, WorkerCoreRequest};
use crate::subscribers::SubscriberSet;

use super::WorkerPoolBuilder;

struct Fulfillers<C: WorkerCore> {
    local: Option<SingleSourceFulfiller<C>>,
    remote: Option<MultipleSourceFulfiller<C>>,
}

/// Composition of the request registry, providers and fulfillers.
pub struct WorkerPool<C: WorkerCore> {
    cfg: Config,
    bus: Bus,
    requests: RequestCollection<C>,
    remote_providers: ProviderCollection<C>,
    fulfillers: Mutex<Fulfillers<C>>,
    listener_token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<C: WorkerCore> WorkerPool<C> {
    /// Returns a builder for a pool with the given configuration.
    pub fn builder(cfg: Config) -> WorkerPoolBuilder<C> {
        WorkerPoolBuilder::new(cfg)
    }

    pub(super) fn start(builder: WorkerPoolBuilder<C>) -> Result<Self, CoreError> {
        let WorkerPoolBuilder {
            cfg,
            local,
            remote,
            subscribers,
        } = builder;

        let bus = Bus::new(cfg.bus_capacity_clamped());
        let listener_token = CancellationToken::new();
        let listener = (!subscribers.is_empty()).then(|| {
            let set = SubscriberSet::new(subscribers, bus.clone());
            spawn_listener(bus.subscribe(), set, listener_token.clone())
        });

        let requests = RequestCollection::new(bus.clone());
        let remote_providers = ProviderCollection::new(bus.clone());
        for provider in remote {
            remote_providers.add(provider)?;
        }

        let local =
            local.map(|provider| SingleSourceFulfiller::start(requests.clone(), provider, &cfg));
        let remote = MultipleSourceFulfiller::start(requests.clone(), remote_providers.clone(), &cfg);
        info!(
            local = local.is_some(),
            remote_providers = remote_providers.len(),
            "worker pool started"
        );

        Ok(Self {
            cfg,
            bus,
            requests,
            remote_providers,
            fulfillers: Mutex::new(Fulfillers {
                local,
                remote: Some(remote),
            }),
            listener_token,
            listener: Mutex::new(listener),
        })
    }

    /// Reserves one core: creates a request and waits until it is fulfilled.
    ///
    /// The returned request holds the core; release (or drop) it when the work is done.
    ///
    /// # Errors
    /// [`CoreError::Cancelled`] if `cancel` fires first. Nothing stays registered.
    pub async fn reserve_core(
        &self,
        preference: CorePreference,
        cancel: &CancellationToken,
    ) -> Result<WorkerCoreRequest<C>, CoreError> {
        let request = self
            .requests
            .create_fulfilled_request(preference, cancel)
            .await;
        if let Err(err) = &request {
            debug!(?preference, err = %err, "core reservation abandoned");
        }
        request
    }

    /// Registers a remote provider; the multi-source fulfiller starts using it at once.
    pub fn add_remote_provider(&self, provider: ProviderRef<C>) -> Result<(), CoreError> {
        self.remote_providers.add(provider)
    }

    /// Unregisters a remote provider (e.g. its agent disconnected). Returns `false` if
    /// no provider had this id.
    pub fn remove_remote_provider(&self, id: &str) -> bool {
        self.remote_providers.remove(id).is_some()
    }

    pub fn remote_providers(&self) -> &ProviderCollection<C> {
        &self.remote_providers
    }

    pub fn requests(&self) -> &RequestCollection<C> {
        &self.requests
    }

    pub fn statistics(&self) -> RequestStatistics {
        self.requests.statistics()
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Receiver for every event of this pool.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Stops the fulfillers within [`Config::grace`] and then the subscriber listener.
    ///
    /// Requests still held by callers stay valid; releasing them returns their cores.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (mut local, mut remote) = {
            let mut fulfillers = self.fulfillers.lock();
            (fulfillers.local.take(), fulfillers.remote.take())
        };
        let mut handles: Vec<&mut LoopHandle> = Vec::new();
        if let Some(f) = local.as_mut() {
            handles.push(f.handle_mut());
        }
        if let Some(f) = remote.as_mut() {
            handles.push(f.handle_mut());
        }

        let result = wait_all_with_grace(&mut handles, self.cfg.grace).await;
        drop(handles);
        drop(local);
        drop(remote);

        self.listener_token.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        result
    }
}

impl<C: WorkerCore> Drop for WorkerPool<C> {
    fn drop(&mut self) {
        self.listener_token.cancel();
    }
}

/// Cancels every loop and waits up to `grace` for all of them.
async fn wait_all_with_grace(
    handles: &mut [&mut LoopHandle],
    grace: std::time::Duration,
) -> Result<(), RuntimeError> {
    for handle in handles.iter() {
        handle.cancel();
    }

    let done = async {
        for handle in handles.iter_mut() {
            handle.join().await;
        }
    };
    if tokio::time::timeout(grace, done).await.is_ok() {
        info!("worker pool stopped");
        return Ok(());
    }

    let stuck: Vec<String> = handles
        .iter()
        .filter(|h| !h.is_finished())
        .map(|h| h.name().to_string())
        .collect();
    warn!(?grace, ?stuck, "worker pool shutdown exceeded grace");
    Err(RuntimeError::GraceExceeded { grace, stuck })
}

/// Forwards bus events to the subscriber set until `token` fires, then drains.
fn spawn_listener(
    mut rx: broadcast::Receiver<Event>,
    set: SubscriberSet,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => forward(&set, &ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = token.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        forward(&set, &ev);
                    }
                    break;
                }
            }
        }
        set.shutdown().await;
    })
}

fn forward(set: &SubscriberSet, ev: &Event) {
    // Overflow/panic reports go to bus receivers only; feeding them back would let a
    // stuck subscriber amplify its own overflow.
    if ev.is_subscriber_overflow() || ev.is_subscriber_panic() {
        return;
    }
    set.emit(ev);
}
