use std::any::Any;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::debug;

use crate::context;
use crate::dispatch::{self, DispatchMode};
use crate::padded_type::{PaddedAtomicI64, PaddedAtomicU32, PaddedAtomicU64};
use crate::platform;
use crate::slot::WorkerSlot;
use crate::worker::{spawn_worker, WorkerHook};

/// Options recognized by [`DispatchPool::init`].
///
/// The defaults target 80% of the reported cores with a floor of four
/// workers and a 128KiB scratch arena per worker.
pub struct DispatchConfig {
    /// Target worker count as a fraction of the reported core count.
    pub fraction_of_cores: f64,
    /// Lower bound on the worker count.
    pub min_workers: usize,
    /// Size of the scratch arena each worker allocates for its lifetime.
    pub per_thread_scratch_bytes: usize,
    /// Opaque value handed to each worker's lifecycle hooks.
    pub starting_context: Option<Arc<dyn Any + Send + Sync>>,
    /// Run once inside each worker before it starts waiting for work.
    pub on_start: Option<WorkerHook>,
    /// Run once inside each worker after its stop bit is observed.
    pub on_end: Option<WorkerHook>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            fraction_of_cores: 0.8,
            min_workers: 4,
            per_thread_scratch_bytes: 128 * 1024,
            starting_context: None,
            on_start: None,
            on_end: None,
        }
    }
}

/// State shared between the dispatching thread and every worker.
pub(crate) struct PoolState {
    pub(crate) slots: Box<[WorkerSlot]>,
    /// Nonzero while any caller wants workers spinning instead of parking.
    /// This is also the one address every parked worker waits on, so a
    /// single wake reaches the whole pool.
    pub(crate) wake_hint: PaddedAtomicU32,
    pub(crate) lb_counter: PaddedAtomicI64,
    pub(crate) lb_bound: PaddedAtomicI64,
    /// Completed park episodes, for latency diagnostics.
    pub(crate) parks: PaddedAtomicU64,
    panic_box: Mutex<Option<Box<dyn Any + Send>>>,
    pub(crate) scratch_bytes: usize,
    pub(crate) starting_context: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) on_start: Option<WorkerHook>,
    pub(crate) on_end: Option<WorkerHook>,
}

impl PoolState {
    pub(crate) fn raise_wake_hint(&self) {
        self.wake_hint.fetch_add(1, Ordering::SeqCst);
        platform::wake_all(&self.wake_hint);
    }

    pub(crate) fn lower_wake_hint(&self) {
        let lowered = self
            .wake_hint
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |hint| hint.checked_sub(1));
        assert!(
            lowered.is_ok(),
            "send_threads_to_sleep without a matching wake_threads_up"
        );
        platform::wake_all(&self.wake_hint);
    }

    /// Keeps the first payload; later ones from the same dispatch are dropped.
    pub(crate) fn store_panic(&self, payload: Box<dyn Any + Send>) {
        let mut first = self.panic_box.lock().unwrap();
        if first.is_none() {
            *first = Some(payload);
        }
    }

    pub(crate) fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic_box.lock().unwrap().take()
    }
}

/// A persistent pool of worker threads driven like a GPU compute dispatch:
/// one owning thread launches N items of work at a time and blocks until
/// every item completes.
///
/// The owning thread participates in every dispatch, so a pool with `W`
/// workers executes on `W + 1` threads.
pub struct DispatchPool {
    state: Arc<PoolState>,
    workers: Vec<JoinHandle<()>>,
    owner: ThreadId,
}

impl DispatchPool {
    /// Creates a pool sized and configured by `config`. The calling thread
    /// becomes the pool's owner: only it may dispatch.
    pub fn init(config: DispatchConfig) -> Result<Self, Error> {
        let cores = num_cpus::get();
        let target = (cores as f64 * config.fraction_of_cores).round() as usize;
        Self::init_with_workers(target.max(config.min_workers), config)
    }

    /// Creates a pool with all defaults, panicking on spawn failure.
    pub fn new() -> Self {
        Self::init(DispatchConfig::default()).expect("failed to spawn dispatch pool workers")
    }

    /// Creates a pool with exactly `workers` workers and default options,
    /// panicking on spawn failure. `with_workers(0)` is valid: every
    /// dispatch then runs entirely on the owner thread.
    pub fn with_workers(workers: usize) -> Self {
        Self::init_with_workers(workers, DispatchConfig::default())
            .expect("failed to spawn dispatch pool workers")
    }

    fn init_with_workers(worker_count: usize, config: DispatchConfig) -> Result<Self, Error> {
        let slots: Box<[WorkerSlot]> = (0..worker_count).map(WorkerSlot::new).collect();
        let state = Arc::new(PoolState {
            slots,
            wake_hint: PaddedAtomicU32::new(AtomicU32::new(0)),
            lb_counter: PaddedAtomicI64::new(AtomicI64::new(0)),
            lb_bound: PaddedAtomicI64::new(AtomicI64::new(0)),
            parks: PaddedAtomicU64::new(AtomicU64::new(0)),
            panic_box: Mutex::new(None),
            scratch_bytes: config.per_thread_scratch_bytes,
            starting_context: config.starting_context,
            on_start: config.on_start,
            on_end: config.on_end,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            match spawn_worker(index, Arc::clone(&state)) {
                Ok(handle) => workers.push(handle),
                Err(error) => {
                    // tear down the part of the pool that did come up
                    for slot in state.slots.iter() {
                        slot.request_stop();
                    }
                    state.raise_wake_hint();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(Error::Spawn(error));
                }
            }
        }

        // the owner acts as the extra executor, with worker_count as its
        // pseudo thread index
        context::bind_thread_index(worker_count as isize);
        debug!(worker_count, "dispatch pool up");

        Ok(DispatchPool {
            state,
            workers,
            owner: thread::current().id(),
        })
    }

    /// Number of pool workers. Every dispatch runs on `worker_count() + 1`
    /// executors.
    pub fn worker_count(&self) -> usize {
        self.state.slots.len()
    }

    /// Completed worker park episodes since init. A burst of dispatches that
    /// stays inside the spin window leaves this unchanged.
    pub fn park_count(&self) -> u64 {
        self.state.parks.load(Ordering::Relaxed)
    }

    /// Executes `work` for every index in `0..count` (or `0..count` per
    /// executor in [`DispatchMode::PerThread`]) and returns when every item
    /// has completed. `count == 0` is a valid no-op.
    ///
    /// Within `work`, [`crate::dispatch_index`] returns the item index and
    /// [`crate::thread_index`] the executor index.
    ///
    /// Must be called on the owner thread, never from inside a worker; a
    /// panic inside `work` is re-raised here after the dispatch completes,
    /// leaving the pool usable.
    pub fn dispatch<F>(&self, count: usize, mode: DispatchMode, work: F)
    where
        F: Fn(usize) + Sync,
    {
        self.assert_owner("dispatch");
        dispatch::run_dispatch(&self.state, count, mode, work);
    }

    /// Hints that dispatches are imminent: workers spin instead of parking
    /// until the matching [`Self::send_threads_to_sleep`]. Calls may nest.
    pub fn wake_threads_up(&self) {
        self.assert_owner("wake_threads_up");
        self.state.raise_wake_hint();
    }

    /// Reverses one [`Self::wake_threads_up`]. Panics if the hint counter
    /// would go negative.
    pub fn send_threads_to_sleep(&self) {
        self.assert_owner("send_threads_to_sleep");
        self.state.lower_wake_hint();
    }

    /// Stops and joins every worker. Dropping the pool does the same; this
    /// form exists so teardown is visible at the call site, and consuming
    /// the pool makes a second deinit unrepresentable.
    pub fn deinit(self) {}

    fn assert_owner(&self, operation: &str) {
        assert_eq!(
            self.owner,
            thread::current().id(),
            "{} must be called from the thread that initialized the pool",
            operation
        );
    }

    fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        debug!(worker_count = self.workers.len(), "dispatch pool shutting down");
        for slot in self.state.slots.iter() {
            slot.request_stop();
        }
        // a raised hint both unparks sleepers and stops new parks, so every
        // worker reaches its stop check
        self.state.raise_wake_hint();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.state.lower_wake_hint();
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchPool")
            .field("workers", &self.worker_count())
            .field("parks", &self.park_count())
            .finish()
    }
}

/// Failures surfaced by [`DispatchPool::init`].
#[derive(Debug)]
pub enum Error {
    /// The OS refused to create a worker thread.
    Spawn(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spawn(e) => write!(f, "thread-spawn failure: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Spawn(e) => Some(e),
        }
    }
}
