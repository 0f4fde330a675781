//! Bounded pool of generation workers.
//!
//! Borrow accounting lives in one place: a semaphore whose permits equal the
//! number of live slots. A `Handle` owns a permit for as long as it holds a
//! slot, so `borrowed <= total_instances <= max_instances` at all times.
//! Slot bookkeeping (borrowed, replacing, health) sits behind a mutex that is
//! never held across an await.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use localqa_core::config::{GenerationParams, PoolSettings, PromptSettings};

use crate::error::{GenerationError, PoolError};
use crate::executor::describe_failure;
use crate::generator::{Generator, GeneratorFactory};
use crate::prompt::PromptTemplate;

/// One generation backend inside the pool.
pub struct WorkerSlot {
    id: usize,
    generator: Arc<dyn Generator>,
    max_consecutive_failures: u32,
    consecutive_failures: AtomicU32,
    healthy: AtomicBool,
    last_used: Mutex<Option<Instant>>,
    gate: tokio::sync::Mutex<()>,
}

impl WorkerSlot {
    pub fn new(id: usize, generator: Arc<dyn Generator>, max_consecutive_failures: u32) -> Self {
        Self {
            id,
            generator,
            max_consecutive_failures: max_consecutive_failures.max(1),
            consecutive_failures: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            last_used: Mutex::new(None),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> usize { self.id }

    pub fn is_healthy(&self) -> bool { self.healthy.load(Ordering::Acquire) && self.generator.is_healthy() }

    pub fn consecutive_failures(&self) -> u32 { self.consecutive_failures.load(Ordering::Acquire) }

    pub fn last_used(&self) -> Option<Instant> { *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) }

    pub fn in_flight(&self) -> bool { self.gate.try_lock().is_err() }

    /// Serialized generation with failure accounting. A run of
    /// `max_consecutive_failures` errors marks the slot unhealthy.
    pub async fn generate(&self, system_prompt: &str, question: &str, params: &GenerationParams) -> Result<String, GenerationError> {
        let _gate = self.gate.lock().await;
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        match self.generator.generate(system_prompt, question, params).await {
            Ok(answer) => {
                self.consecutive_failures.store(0, Ordering::Release);
                Ok(answer)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.max_consecutive_failures && self.healthy.swap(false, Ordering::AcqRel) {
                    warn!(slot = self.id, failures, error = %e, "slot marked unhealthy");
                }
                Err(e)
            }
        }
    }

    async fn shutdown(&self) { self.generator.shutdown().await; }
}

struct SlotEntry {
    slot: Arc<WorkerSlot>,
    borrowed: bool,
    replacing: bool,
}

struct PoolState {
    settings: PoolSettings,
    factory: Arc<dyn GeneratorFactory>,
    slots: Vec<SlotEntry>,
    permits: Arc<Semaphore>,
    epoch: u64,
    initialized: bool,
    rebuilding: bool,
    disposed: bool,
}

struct PoolInner {
    state: Mutex<PoolState>,
    changed: Notify,
    prompt: PromptTemplate,
    params: GenerationParams,
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    fn release_slot(&self, slot_id: usize, epoch: u64) {
        {
            let mut state = self.state();
            if state.epoch != epoch { return; }
            if let Some(entry) = state.slots.iter_mut().find(|e| e.slot.id == slot_id) {
                entry.borrowed = false;
            }
        }
        // acquirers parked on a replacement rescan for the freed slot
        self.changed.notify_waiters();
    }
}

/// Bounded set of reusable generators handed out one caller at a time.
///
/// Lifecycle: `new` -> `initialize` -> `acquire`/`release` ... ->
/// `reinitialize` (optional, repeatable) -> `dispose`.
#[derive(Clone)]
pub struct InstancePool {
    inner: Arc<PoolInner>,
}

impl InstancePool {
    pub fn new(settings: PoolSettings, factory: Arc<dyn GeneratorFactory>) -> Result<Self, PoolError> {
        let prompt = PromptTemplate::new(PromptSettings::default().system);
        Self::with_generation(settings, factory, prompt, GenerationParams::default())
    }

    /// `prompt` and `params` are what [`ask`](Self::ask) sends to every slot.
    pub fn with_generation(
        settings: PoolSettings,
        factory: Arc<dyn GeneratorFactory>,
        prompt: PromptTemplate,
        params: GenerationParams,
    ) -> Result<Self, PoolError> {
        validate(&settings)?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    settings,
                    factory,
                    slots: Vec::new(),
                    permits: Arc::new(Semaphore::new(0)),
                    epoch: 0,
                    initialized: false,
                    rebuilding: false,
                    disposed: false,
                }),
                changed: Notify::new(),
                prompt,
                params,
            }),
        })
    }

    pub fn max_instances(&self) -> usize { self.inner.state().settings.max_instances }

    /// Slots currently alive, borrowed or not.
    pub fn total_instances(&self) -> usize { self.inner.state().slots.len() }

    /// Slots that can be borrowed without waiting.
    pub fn available_count(&self) -> usize { self.inner.state().permits.available_permits() }

    pub fn is_initialized(&self) -> bool { self.inner.state().initialized }

    pub fn is_disposed(&self) -> bool { self.inner.state().disposed }

    pub async fn initialize(&self) -> Result<(), PoolError> { self.initialize_with_progress(|_, _| {}).await }

    /// Build all slots; `progress(done, total)` fires as each finishes.
    /// Fails only if no slot could be built.
    pub async fn initialize_with_progress<F>(&self, progress: F) -> Result<(), PoolError>
    where
        F: FnMut(usize, usize),
    {
        let (factory, settings) = {
            let mut state = self.inner.state();
            if state.disposed { return Err(PoolError::Disposed); }
            if state.initialized || state.rebuilding { return Err(PoolError::AlreadyInitialized); }
            state.rebuilding = true;
            if state.permits.is_closed() {
                state.permits = Arc::new(Semaphore::new(0));
            }
            (Arc::clone(&state.factory), state.settings.clone())
        };
        let built = build_slots(&factory, &settings, progress).await;
        self.install(built).await
    }

    /// Drop every slot and rebuild from `factory` and `settings`, e.g. to swap models.
    /// Acquires issued meanwhile wait for the new slots.
    pub async fn reinitialize<F>(&self, factory: Arc<dyn GeneratorFactory>, settings: PoolSettings, progress: F) -> Result<(), PoolError>
    where
        F: FnMut(usize, usize),
    {
        validate(&settings)?;
        let old = {
            let mut state = self.inner.state();
            if state.disposed { return Err(PoolError::Disposed); }
            if !state.initialized || state.rebuilding { return Err(PoolError::NotInitialized); }
            let borrowed = state.slots.iter().filter(|e| e.borrowed).count();
            if borrowed > 0 {
                warn!(borrowed, "reinitializing while slots are still borrowed");
            }
            state.epoch += 1;
            state.rebuilding = true;
            state.settings = settings.clone();
            state.factory = Arc::clone(&factory);
            let old_permits = std::mem::replace(&mut state.permits, Arc::new(Semaphore::new(0)));
            old_permits.close();
            std::mem::take(&mut state.slots)
        };
        self.inner.changed.notify_waiters();
        info!(old_slots = old.len(), max_instances = settings.max_instances, "reinitializing pool");
        for entry in old {
            entry.slot.shutdown().await;
        }
        let built = build_slots(&factory, &settings, progress).await;
        self.install(built).await
    }

    async fn install(&self, built: Result<Vec<Arc<WorkerSlot>>, PoolError>) -> Result<(), PoolError> {
        let (result, orphans) = {
            let mut state = self.inner.state();
            state.rebuilding = false;
            match built {
                Ok(slots) if state.disposed => (Err(PoolError::Disposed), slots),
                Ok(slots) => {
                    let count = slots.len();
                    state.slots = slots.into_iter().map(|slot| SlotEntry { slot, borrowed: false, replacing: false }).collect();
                    state.initialized = true;
                    state.permits.add_permits(count);
                    info!(instances = count, max_instances = state.settings.max_instances, "pool ready");
                    (Ok(()), Vec::new())
                }
                Err(e) => {
                    // wake acquires parked on the empty semaphore
                    state.initialized = false;
                    state.permits.close();
                    (Err(e), Vec::new())
                }
            }
        };
        self.inner.changed.notify_waiters();
        for slot in orphans {
            slot.shutdown().await;
        }
        result
    }

    pub async fn acquire(&self) -> Result<Handle, PoolError> { self.acquire_with_cancel(&CancellationToken::new()).await }

    /// Wait for a free healthy slot. Returns `Cancelled` without borrowing
    /// anything if `cancel` fires first.
    pub async fn acquire_with_cancel(&self, cancel: &CancellationToken) -> Result<Handle, PoolError> {
        loop {
            let (permits, epoch) = {
                let state = self.inner.state();
                if state.disposed { return Err(PoolError::Disposed); }
                if !state.initialized && !state.rebuilding { return Err(PoolError::NotInitialized); }
                (Arc::clone(&state.permits), state.epoch)
            };
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PoolError::Cancelled),
                permit = permits.acquire_owned() => match permit {
                    Ok(p) => p,
                    // closed by dispose or reinitialize; re-read state
                    Err(_) => continue,
                },
            };
            if let Some(handle) = self.claim_slot(permit, epoch, cancel).await? {
                return Ok(handle);
            }
        }
    }

    /// With a permit in hand, pick a free healthy slot. Unhealthy free slots
    /// are sent for replacement and the search waits for one to come back.
    async fn claim_slot(&self, permit: OwnedSemaphorePermit, epoch: u64, cancel: &CancellationToken) -> Result<Option<Handle>, PoolError> {
        let max_attempts = self.inner.state().settings.max_acquire_attempts.max(1);
        for attempt in 1..=max_attempts {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut to_replace = Vec::new();
            let chosen = {
                let mut state = self.inner.state();
                if state.disposed { return Err(PoolError::Disposed); }
                if state.epoch != epoch { return Ok(None); }
                let mut chosen = None;
                for entry in state.slots.iter_mut().filter(|e| !e.borrowed && !e.replacing) {
                    if entry.slot.is_healthy() {
                        entry.borrowed = true;
                        chosen = Some(Arc::clone(&entry.slot));
                        break;
                    }
                    entry.replacing = true;
                    to_replace.push(Arc::clone(&entry.slot));
                }
                chosen
            };
            // queued replacements run even when a healthy slot was found
            for slot in to_replace {
                self.spawn_replacement(slot, epoch);
            }
            if let Some(slot) = chosen {
                debug!(slot = slot.id, attempt, "slot acquired");
                return Ok(Some(Handle { pool: Arc::clone(&self.inner), slot, epoch, permit: Some(permit) }));
            }
            debug!(attempt, "no healthy slot free, waiting for replacement");
            tokio::select! {
                () = &mut notified => {}
                () = cancel.cancelled() => return Err(PoolError::Cancelled),
            }
        }
        warn!(attempts = max_attempts, "gave up waiting for a healthy slot");
        Err(PoolError::Unavailable(max_attempts))
    }

    fn spawn_replacement(&self, old: Arc<WorkerSlot>, epoch: u64) {
        warn!(slot = old.id, failures = old.consecutive_failures(), "replacing unhealthy slot");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            old.shutdown().await;
            let (factory, max_failures) = {
                let state = inner.state();
                (Arc::clone(&state.factory), state.settings.max_consecutive_failures)
            };
            let created = factory.create(old.id).await;
            let orphan = {
                let mut state = inner.state();
                let live = state.epoch == epoch && !state.disposed;
                let entry = state.slots.iter_mut().find(|e| e.slot.id == old.id).filter(|_| live);
                match (entry, created) {
                    (Some(entry), Ok(generator)) => {
                        entry.slot = Arc::new(WorkerSlot::new(old.id, generator, max_failures));
                        entry.replacing = false;
                        info!(slot = old.id, "slot replaced");
                        None
                    }
                    (Some(entry), Err(e)) => {
                        entry.replacing = false;
                        warn!(slot = old.id, error = %e, "slot replacement failed");
                        None
                    }
                    (None, Ok(generator)) => Some(generator),
                    (None, Err(_)) => None,
                }
            };
            if let Some(generator) = orphan {
                generator.shutdown().await;
            }
            inner.changed.notify_waiters();
        });
    }

    /// Return a slot. Same as `handle.release()`; repeated calls are no-ops.
    pub fn release(&self, handle: &mut Handle) { handle.release(); }

    /// Shut every slot down. Pending and future acquires fail with `Disposed`.
    pub async fn dispose(&self) {
        let slots = {
            let mut state = self.inner.state();
            if state.disposed { return; }
            state.disposed = true;
            state.initialized = false;
            state.epoch += 1;
            state.permits.close();
            std::mem::take(&mut state.slots)
        };
        self.inner.changed.notify_waiters();
        for entry in &slots {
            entry.slot.shutdown().await;
        }
        info!(slots = slots.len(), "pool disposed");
    }

    /// Answer `question` against `context` on any free slot. Generation
    /// failures come back as an `Error: ...` message; only pool misuse is `Err`.
    pub async fn ask(&self, context: &str, question: &str) -> Result<String, PoolError> {
        self.ask_with_cancel(context, question, &CancellationToken::new()).await
    }

    /// `cancel` only applies while waiting for a slot.
    pub async fn ask_with_cancel(&self, context: &str, question: &str, cancel: &CancellationToken) -> Result<String, PoolError> {
        let mut handle = self.acquire_with_cancel(cancel).await?;
        let system_prompt = self.inner.prompt.system_prompt(context);
        let started = Instant::now();
        let answer = match handle.generate(&system_prompt, question, &self.inner.params).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(slot = handle.slot_id(), error = %e, "generation failed");
                describe_failure(&e)
            }
        };
        debug!(slot = handle.slot_id(), elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX), "ask complete");
        handle.release();
        Ok(answer)
    }
}

fn validate(settings: &PoolSettings) -> Result<(), PoolError> {
    if settings.max_instances == 0 {
        return Err(PoolError::InvalidConfig("max_instances must be at least 1".into()));
    }
    Ok(())
}

async fn build_slots<F>(factory: &Arc<dyn GeneratorFactory>, settings: &PoolSettings, mut progress: F) -> Result<Vec<Arc<WorkerSlot>>, PoolError>
where
    F: FnMut(usize, usize),
{
    let total = settings.max_instances;
    let mut pending: FuturesUnordered<_> = (0..total)
        .map(|id| {
            let factory = Arc::clone(factory);
            async move { (id, factory.create(id).await) }
        })
        .collect();
    let mut slots = Vec::with_capacity(total);
    let mut last_error = String::new();
    let mut done = 0;
    while let Some((id, created)) = pending.next().await {
        done += 1;
        progress(done, total);
        match created {
            Ok(generator) => slots.push(Arc::new(WorkerSlot::new(id, generator, settings.max_consecutive_failures))),
            Err(e) => {
                warn!(slot = id, error = %e, "failed to create generator");
                last_error = e.to_string();
            }
        }
    }
    if slots.is_empty() {
        return Err(PoolError::NoInstances { attempted: total, last_error });
    }
    if slots.len() < total {
        warn!(created = slots.len(), requested = total, "pool running below configured capacity");
    }
    slots.sort_by_key(|s| s.id);
    Ok(slots)
}

/// Exclusive borrow of one slot. Dropping the handle releases it.
pub struct Handle {
    pool: Arc<PoolInner>,
    slot: Arc<WorkerSlot>,
    epoch: u64,
    permit: Option<OwnedSemaphorePermit>,
}

impl Handle {
    pub fn slot(&self) -> &WorkerSlot { &self.slot }

    pub fn slot_id(&self) -> usize { self.slot.id }

    pub fn is_released(&self) -> bool { self.permit.is_none() }

    pub async fn generate(&self, system_prompt: &str, question: &str, params: &GenerationParams) -> Result<String, GenerationError> {
        self.slot.generate(system_prompt, question, params).await
    }

    /// Idempotent. The slot is marked free before the permit is returned so
    /// the woken waiter finds it.
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.pool.release_slot(self.slot.id, self.epoch);
            drop(permit);
            debug!(slot = self.slot.id, "slot released");
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) { self.release(); }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("slot", &self.slot.id).field("released", &self.is_released()).finish()
    }
}
