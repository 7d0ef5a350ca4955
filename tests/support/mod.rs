//! Providers and cores used by the pool scenarios.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use corevisor::{CoreError, CoreLiveness, CoreLocality, WorkerCore, WorkerCoreProvider};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Counting provider whose cores can be dead on arrival.
///
/// A dying agent hands out cores that are each dead with an independent even chance.
pub struct Agent {
    id: Arc<str>,
    locality: CoreLocality,
    capacity: usize,
    slots: Arc<Semaphore>,
    issued: AtomicU64,
    dying: bool,
    in_use: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Agent {
    pub fn new(id: &str, capacity: usize) -> Arc<Self> {
        Self::build(id, CoreLocality::Remote, capacity, false)
    }

    pub fn local(id: &str, capacity: usize) -> Arc<Self> {
        Self::build(id, CoreLocality::Local, capacity, false)
    }

    pub fn with_dying(id: &str, capacity: usize, dying: bool) -> Arc<Self> {
        Self::build(id, CoreLocality::Remote, capacity, dying)
    }

    fn build(id: &str, locality: CoreLocality, capacity: usize, dying: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            locality,
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            issued: AtomicU64::new(0),
            dying,
            in_use: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerCoreProvider<AgentCore> for Agent {
    fn id(&self) -> &str {
        &self.id
    }

    fn locality(&self) -> CoreLocality {
        self.locality
    }

    async fn request_core(&self, cancel: &CancellationToken) -> Result<AgentCore, CoreError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            permit = Arc::clone(&self.slots).acquire_owned() => permit,
        };
        let permit = permit.map_err(|_| CoreError::ProviderClosed {
            id: self.id.to_string(),
        })?;

        let serial = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let alive = !self.dying || rand::rng().random_bool(0.5);
        let now = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(AgentCore {
            agent: Arc::clone(&self.id),
            locality: self.locality,
            serial,
            alive,
            in_use: Arc::clone(&self.in_use),
            _permit: permit,
        })
    }
}

pub struct AgentCore {
    agent: Arc<str>,
    locality: CoreLocality,
    serial: u64,
    alive: bool,
    in_use: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl AgentCore {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn locality(&self) -> CoreLocality {
        self.locality
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn alive(&self) -> bool {
        self.alive
    }
}

impl Drop for AgentCore {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoreLiveness for AgentCore {
    async fn is_alive(&self, _cancel: &CancellationToken) -> bool {
        self.alive
    }
}

impl WorkerCore for AgentCore {
    fn liveness(&self) -> Option<&dyn CoreLiveness> {
        Some(self)
    }
}

/// Provider that never answers and ignores cancellation.
pub struct Unresponsive;

#[async_trait]
impl WorkerCoreProvider<AgentCore> for Unresponsive {
    fn id(&self) -> &str {
        "unresponsive"
    }

    fn locality(&self) -> CoreLocality {
        CoreLocality::Remote
    }

    async fn request_core(&self, _cancel: &CancellationToken) -> Result<AgentCore, CoreError> {
        std::future::pending().await
    }
}

/// Set of cores currently held by callers, keyed by (agent, serial).
#[derive(Clone, Default)]
pub struct Holders {
    held: Arc<Mutex<HashSet<(String, u64)>>>,
}

impl Holders {
    /// Returns `false` if the core is already held by someone else.
    pub fn take(&self, core: &AgentCore) -> bool {
        self.held
            .lock()
            .insert((core.agent().to_string(), core.serial()))
    }

    pub fn give_back(&self, core: &AgentCore) {
        self.held
            .lock()
            .remove(&(core.agent().to_string(), core.serial()));
    }

    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }
}
