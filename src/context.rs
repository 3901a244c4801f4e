//! Per-thread identity of the executing code: which executor this thread is,
//! and which item it is currently running.

use std::cell::Cell;

thread_local! {
    static DISPATCH_INDEX: Cell<isize> = const { Cell::new(-1) };
    static THREAD_INDEX: Cell<isize> = const { Cell::new(-1) };
}

/// Index of the item currently being executed by this thread, or `-1` when
/// the thread is not inside a user work function.
pub fn dispatch_index() -> isize {
    DISPATCH_INDEX.get()
}

/// Index of the executor this thread is: `0..worker_count` for pool workers,
/// `worker_count` for the thread that initialized the pool, `-1` for any
/// other thread.
pub fn thread_index() -> isize {
    THREAD_INDEX.get()
}

pub(crate) fn bind_thread_index(index: isize) {
    THREAD_INDEX.set(index);
}

/// Binds the dispatch index for the duration of one user call; the previous
/// sentinel is restored on drop, so an unwinding work function cannot leak a
/// stale index into later code on this thread.
pub(crate) struct ItemGuard;

impl ItemGuard {
    #[inline]
    pub(crate) fn enter(index: usize) -> Self {
        DISPATCH_INDEX.set(index as isize);
        ItemGuard
    }
}

impl Drop for ItemGuard {
    #[inline]
    fn drop(&mut self) {
        DISPATCH_INDEX.set(-1);
    }
}
