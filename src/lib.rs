//! # Dispatch-Pool: Parallel-For Dispatch Runtime
//!
//! A persistent worker pool driven like a GPU compute dispatch: a single
//! owner thread repeatedly launches N items of work and blocks until every
//! item completes, so application code stays single-threaded and gets
//! parallelized one loop at a time.
//!
//! Designed for the "many tiny dispatches in a row" case:
//! - Per-worker handoff through one cache-line-aligned flag, no queue
//! - Workers spin through short gaps between dispatches and only park
//!   (futex / `WaitOnAddress` / ulock) once the pool goes cold
//! - A global wake hint ([`DispatchPool::wake_threads_up`]) pins workers hot
//!   through a latency-critical phase, at the price of burnt CPU
//! - Three distribution strategies: contiguous ranges, shared-counter load
//!   balancing, and per-thread replication
//!
//! ## Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use dispatch_pool::{DispatchMode, DispatchPool};
//!
//! let pool = DispatchPool::with_workers(2);
//! let squares: Vec<AtomicU64> = (0..8).map(|_| AtomicU64::new(0)).collect();
//!
//! pool.dispatch(8, DispatchMode::Contiguous, |i| {
//!     squares[i].store((i * i) as u64, Ordering::Relaxed);
//! });
//!
//! assert_eq!(squares[5].load(Ordering::Relaxed), 25);
//! ```
//!
//! ## Ground rules
//!
//! Only the thread that initialized the pool may dispatch, and only one
//! dispatch is ever in flight; workers must never dispatch themselves.
//! A panic inside the work function is caught, the protocol is brought back
//! to idle, and the panic resumes on the owner thread.

mod context;
mod dispatch;
mod padded_type;
mod platform;
mod pool;
mod slot;
mod worker;

pub use context::{dispatch_index, thread_index};
pub use dispatch::DispatchMode;
pub use pool::{DispatchConfig, DispatchPool, Error};
pub use worker::{WorkerEnv, WorkerHook};

/// Internal trampoline signature: opaque user data plus an inclusive index
/// range. Monomorphized per closure type by the dispatcher.
pub(crate) type RangeFn = unsafe fn(*const (), usize, usize);
