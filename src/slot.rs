use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::trace;

use crate::padded_type::CACHE_LINE;
use crate::RangeFn;

/// Work-flag values. Per slot the flag only ever cycles
/// `IDLE -> AVAILABLE -> DONE -> IDLE`, with one dispatcher-only shortcut
/// `IDLE -> DONE` for a dispatch that assigns the worker nothing.
pub(crate) const IDLE: u32 = 0;
pub(crate) const AVAILABLE: u32 = 1;
pub(crate) const DONE: u32 = 2;

unsafe fn unassigned(_data: *const (), _first: usize, _last: usize) {
    unreachable!("trampoline invoked on a slot with no assignment")
}

/// One worker's handoff record. The dispatcher writes the range and
/// trampoline fields, then flips `work_flag`; the flag exchange is the only
/// synchronization, publishing the plain fields in both directions.
///
/// Each slot owns a full cache line so adjacent workers never contend on
/// each other's flag.
#[repr(align(64))]
pub(crate) struct WorkerSlot {
    thread_index: usize,
    work_flag: AtomicU32,
    should_stop: AtomicBool,
    first: Cell<usize>,
    last: Cell<usize>,
    range_fn: Cell<RangeFn>,
    user_data: Cell<*const ()>,
}

const _: () = assert!(std::mem::size_of::<WorkerSlot>() == CACHE_LINE);
const _: () = assert!(std::mem::align_of::<WorkerSlot>() == CACHE_LINE);

// plain fields are only touched under the flag protocol above
unsafe impl Sync for WorkerSlot {}
unsafe impl Send for WorkerSlot {}

impl WorkerSlot {
    pub(crate) fn new(thread_index: usize) -> Self {
        WorkerSlot {
            thread_index,
            work_flag: AtomicU32::new(IDLE),
            should_stop: AtomicBool::new(false),
            first: Cell::new(0),
            last: Cell::new(0),
            range_fn: Cell::new(unassigned),
            user_data: Cell::new(std::ptr::null()),
        }
    }

    #[inline]
    pub(crate) fn flag_relaxed(&self) -> u32 {
        self.work_flag.load(Ordering::Relaxed)
    }

    /// Dispatcher side: stage the assignment. Must be followed by
    /// `signal_available` before the worker is allowed to look at the fields.
    pub(crate) fn assign(&self, first: usize, last: usize, range_fn: RangeFn, user_data: *const ()) {
        self.first.set(first);
        self.last.set(last);
        self.range_fn.set(range_fn);
        self.user_data.set(user_data);
    }

    /// Worker side: read back the staged assignment. Caller must have
    /// observed AVAILABLE with acquire ordering first.
    pub(crate) fn assignment(&self) -> (usize, usize, RangeFn, *const ()) {
        (
            self.first.get(),
            self.last.get(),
            self.range_fn.get(),
            self.user_data.get(),
        )
    }

    /// IDLE -> AVAILABLE (dispatcher).
    pub(crate) fn signal_available(&self) {
        let previous = self.work_flag.swap(AVAILABLE, Ordering::AcqRel);
        trace!(slot = self.thread_index, previous, "flag -> AVAILABLE");
        debug_assert_eq!(previous, IDLE, "slot {} was not idle when handed work", self.thread_index);
    }

    /// IDLE -> DONE (dispatcher, zero-work shortcut). The worker is never
    /// woken for this dispatch.
    pub(crate) fn signal_no_work(&self) {
        let previous = self.work_flag.swap(DONE, Ordering::AcqRel);
        trace!(slot = self.thread_index, previous, "flag -> DONE (no work)");
        debug_assert_eq!(previous, IDLE, "slot {} was not idle when skipped", self.thread_index);
    }

    /// AVAILABLE -> DONE (worker, after executing its range). The zero-work
    /// path never wakes the worker, so IDLE cannot legally be observed here.
    pub(crate) fn signal_done(&self) {
        let previous = self.work_flag.swap(DONE, Ordering::AcqRel);
        trace!(slot = self.thread_index, previous, "flag -> DONE");
        debug_assert_eq!(
            previous, AVAILABLE,
            "slot {} finished a range it was never handed",
            self.thread_index
        );
    }

    /// DONE -> IDLE (dispatcher, after its wait loop saw DONE).
    pub(crate) fn acknowledge_done(&self) {
        let previous = self.work_flag.swap(IDLE, Ordering::AcqRel);
        trace!(slot = self.thread_index, previous, "flag -> IDLE");
        debug_assert_eq!(
            previous, DONE,
            "slot {} was reset before it reported done",
            self.thread_index
        );
    }

    pub(crate) fn request_stop(&self) {
        self.should_stop.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn stop_requested(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }
}
