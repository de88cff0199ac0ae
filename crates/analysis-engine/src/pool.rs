//! Fixed-capacity pool of engine processes for one variant.
//!
//! A pool owns at most `pool_size` processes. Each is either idle in the queue
//! or leased to exactly one caller. Liveness is checked only when a slot is
//! leased or returned; a process that fails either check is discarded and its
//! slot becomes a vacancy that the next lease fills with a fresh process.
//!
//! When every slot is leased and the lease timeout elapses the caller gets a
//! temporary process that is never counted against capacity.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{EngineSettings, EngineSpec, Variant};
use crate::engine::{EngineProcess, SlotState};

/// Snapshot of a variant pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub variant: Variant,
    pub capacity: usize,
    pub idle: usize,
    pub leased: usize,
    pub initialized: bool,
}

#[derive(Default)]
struct SlotTable {
    idle: VecDeque<EngineProcess>,
    /// Pooled slots handed out, including ones still being created
    leased: usize,
}

enum Claim {
    Idle(EngineProcess),
    Vacancy,
    Exhausted,
}

struct PoolInner {
    variant: Variant,
    spec: EngineSpec,
    settings: EngineSettings,
    slots: Mutex<SlotTable>,
    returned: Notify,
    shutting_down: AtomicBool,
    next_id: AtomicU64,
}

impl PoolInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Take an idle process, or reserve a vacant slot.
    fn claim(&self) -> Claim {
        let mut slots = self.slots.lock();
        if let Some(engine) = slots.idle.pop_front() {
            slots.leased += 1;
            Claim::Idle(engine)
        } else if slots.leased < self.settings.pool_size {
            slots.leased += 1;
            Claim::Vacancy
        } else {
            Claim::Exhausted
        }
    }

    /// Put a healthy process back. Hands it back to the caller if the pool is
    /// shutting down.
    fn check_in(&self, mut engine: EngineProcess) -> Option<EngineProcess> {
        let mut slots = self.slots.lock();
        slots.leased -= 1;
        if self.is_shutting_down() {
            drop(slots);
            self.returned.notify_one();
            return Some(engine);
        }
        engine.set_state(SlotState::Idle);
        slots.idle.push_back(engine);
        drop(slots);
        self.returned.notify_one();
        None
    }

    /// Give up a leased slot without returning a process.
    fn vacate(&self) {
        self.slots.lock().leased -= 1;
        self.returned.notify_one();
    }

    async fn spawn(&self) -> Option<EngineProcess> {
        let id = self.next_id();
        match EngineProcess::spawn(id, &self.spec, &self.settings).await {
            Ok(engine) => Some(engine),
            Err(e) => {
                error!(variant = %self.variant, engine_id = id, error = %e, "Failed to create engine");
                None
            }
        }
    }
}

/// Accounting for one pooled slot between lease and return.
///
/// Dropping it without checking a process back in frees the slot.
struct SlotGuard {
    inner: Arc<PoolInner>,
    settled: bool,
}

impl SlotGuard {
    fn new(inner: Arc<PoolInner>) -> Self {
        Self {
            inner,
            settled: false,
        }
    }

    fn check_in(mut self, engine: EngineProcess) -> Option<EngineProcess> {
        self.settled = true;
        self.inner.check_in(engine)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.vacate();
        }
    }
}

/// An engine held exclusively by one caller until passed to
/// [`EnginePool::release`].
pub struct EngineLease {
    engine: EngineProcess,
    /// `None` for a temporary process outside pool capacity
    slot: Option<SlotGuard>,
}

impl EngineLease {
    pub fn engine(&mut self) -> &mut EngineProcess {
        &mut self.engine
    }

    pub fn is_temporary(&self) -> bool {
        self.slot.is_none()
    }
}

/// Engine pool for one variant. Cheap to clone.
#[derive(Clone)]
pub struct EnginePool {
    inner: Arc<PoolInner>,
}

impl EnginePool {
    /// Create a pool and start `pool_size` engines.
    ///
    /// Engines that fail to start are logged and left as vacancies.
    pub async fn start(variant: Variant, spec: EngineSpec, settings: EngineSettings) -> Self {
        info!(variant = %variant, path = %spec.path, size = settings.pool_size, "Initializing engine pool");

        let pool = Self {
            inner: Arc::new(PoolInner {
                variant,
                spec,
                settings,
                slots: Mutex::new(SlotTable::default()),
                returned: Notify::new(),
                shutting_down: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        };

        let started = join_all((0..pool.inner.settings.pool_size).map(|_| pool.inner.spawn())).await;
        let mut slots = pool.inner.slots.lock();
        for engine in started.into_iter().flatten() {
            slots.idle.push_back(engine);
        }
        info!(
            variant = %variant,
            ready = slots.idle.len(),
            size = pool.inner.settings.pool_size,
            "Engine pool ready"
        );
        drop(slots);

        pool
    }

    pub fn variant(&self) -> Variant {
        self.inner.variant
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down()
    }

    /// Lease an engine, waiting up to `wait` for a slot.
    ///
    /// Returns `None` only when the pool is shutting down or no engine process
    /// could be started at all.
    pub async fn lease(&self, wait: Duration) -> Option<EngineLease> {
        let deadline = Instant::now() + wait;

        loop {
            if self.is_shutting_down() {
                return None;
            }

            match self.inner.claim() {
                Claim::Idle(engine) => return self.hand_out(engine).await,
                Claim::Vacancy => {
                    let guard = SlotGuard::new(self.inner.clone());
                    debug!(variant = %self.inner.variant, "Filling vacant pool slot");
                    let mut engine = self.inner.spawn().await?;
                    engine.set_state(SlotState::Leased);
                    return Some(EngineLease {
                        engine,
                        slot: Some(guard),
                    });
                }
                Claim::Exhausted => {}
            }

            if timeout_at(deadline, self.inner.returned.notified()).await.is_err() {
                break;
            }
        }

        if self.is_shutting_down() {
            return None;
        }

        warn!(variant = %self.inner.variant, "No engines available in pool, creating temporary engine");
        let mut engine = self.inner.spawn().await?;
        engine.set_state(SlotState::Leased);
        Some(EngineLease { engine, slot: None })
    }

    /// Liveness check on an idle process; a dead one is replaced before the
    /// slot is handed out.
    async fn hand_out(&self, mut engine: EngineProcess) -> Option<EngineLease> {
        let guard = SlotGuard::new(self.inner.clone());

        if !engine.is_alive() {
            warn!(variant = %self.inner.variant, engine_id = engine.id(), "Engine died, creating replacement");
            engine.set_state(SlotState::Dead);
            drop(engine);
            engine = self.inner.spawn().await?;
        }

        engine.set_state(SlotState::Leased);
        Some(EngineLease {
            engine,
            slot: Some(guard),
        })
    }

    /// Return a leased engine.
    ///
    /// A healthy pooled engine is reset and goes back to idle. Temporary
    /// engines, dead ones and ones that fail the reset are terminated; their
    /// slot stays vacant until a later lease fills it.
    pub async fn release(&self, lease: EngineLease) {
        let EngineLease { mut engine, slot } = lease;
        let grace = self.inner.settings.quit_grace;

        let Some(slot) = slot else {
            debug!(variant = %self.inner.variant, engine_id = engine.id(), "Terminating temporary engine");
            engine.terminate(grace).await;
            return;
        };

        if self.is_shutting_down() || engine.state() == SlotState::Dead || !engine.is_alive() {
            drop(slot);
            engine.terminate(grace).await;
            return;
        }

        match engine.reset(self.inner.settings.reset_timeout).await {
            Ok(()) => {
                if let Some(engine) = slot.check_in(engine) {
                    engine.terminate(grace).await;
                }
            }
            Err(e) => {
                warn!(
                    variant = %self.inner.variant,
                    engine_id = engine.id(),
                    error = %e,
                    "Engine unresponsive, discarding"
                );
                drop(slot);
                engine.terminate(grace).await;
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.slots.lock();
        PoolStats {
            variant: self.inner.variant,
            capacity: self.inner.settings.pool_size,
            idle: slots.idle.len(),
            leased: slots.leased,
            initialized: true,
        }
    }

    /// Stop leasing and terminate every idle engine.
    ///
    /// Engines still leased are terminated when they are released.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        info!(variant = %self.inner.variant, "Shutting down engine pool");

        let drained: Vec<EngineProcess> = self.inner.slots.lock().idle.drain(..).collect();
        self.inner.returned.notify_waiters();

        let grace = self.inner.settings.quit_grace;
        join_all(drained.into_iter().map(|engine| engine.terminate(grace))).await;
    }
}
