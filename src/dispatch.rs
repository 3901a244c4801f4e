use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::trace;

use crate::context::ItemGuard;
use crate::pool::PoolState;
use crate::slot::{WorkerSlot, AVAILABLE, DONE};
use crate::RangeFn;

/// How a dispatch distributes its `count` items over the executors (the
/// pool's workers plus the calling thread).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Each executor statically owns one contiguous index range.
    Contiguous,
    /// Executors claim indices one at a time from a shared counter; good for
    /// items of wildly uneven cost.
    LoadBalancing,
    /// Every executor runs the full `0..count` sequence; good for exactly
    /// per-executor side effects such as resetting a per-thread arena.
    PerThread,
}

/// Inclusive index range handed to one executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) first: usize,
    pub(crate) last: usize,
}

/// Contiguous share of executor `k` out of `executors`, or None when the
/// item count leaves nothing for it. The first `count % executors` executors
/// take one extra item; the caller is always executor `executors - 1`, so it
/// sheds load first.
pub(crate) fn partition(count: usize, executors: usize, k: usize) -> Option<Span> {
    debug_assert!(k < executors);
    let base = count / executors;
    let rem = count % executors;
    let len = base + usize::from(k < rem);
    if len == 0 {
        return None;
    }
    let first = k * base + k.min(rem);
    Some(Span {
        first,
        last: first + len - 1,
    })
}

/// Monomorphized trampoline for contiguous and per-thread dispatch: run the
/// closure over an inclusive range, ascending.
///
/// # Safety
/// `data` must point at a live `F` for the duration of the call.
unsafe fn run_range<F: Fn(usize) + Sync>(data: *const (), first: usize, last: usize) {
    let work = &*(data as *const F);
    for index in first..=last {
        let _item = ItemGuard::enter(index);
        work(index);
    }
}

/// Shared-counter work description for load-balancing dispatch. Lives on the
/// dispatcher's stack; `dispatch` blocks, so it outlives every executor's use.
struct BalancedJob<'a, F> {
    work: &'a F,
    counter: &'a AtomicI64,
    bound: &'a AtomicI64,
}

/// Load-balancing trampoline: claim indices until the claim lands past the
/// bound. Every executor over-reads exactly once to detect the end.
///
/// # Safety
/// `data` must point at a live `BalancedJob<F>` for the duration of the call.
unsafe fn run_balanced<F: Fn(usize) + Sync>(data: *const (), _first: usize, _last: usize) {
    let job = &*(data as *const BalancedJob<'_, F>);
    loop {
        let claimed = job.counter.fetch_add(1, Ordering::SeqCst);
        if claimed >= job.bound.load(Ordering::SeqCst) {
            break;
        }
        let index = claimed as usize;
        let _item = ItemGuard::enter(index);
        (job.work)(index);
    }
}

/// Raises the wake hint for the duration of a dispatch and lowers it on
/// every exit path.
struct WakeGuard<'a> {
    state: &'a PoolState,
}

impl<'a> WakeGuard<'a> {
    fn raise(state: &'a PoolState) -> Self {
        state.raise_wake_hint();
        WakeGuard { state }
    }
}

impl Drop for WakeGuard<'_> {
    fn drop(&mut self) {
        self.state.lower_wake_hint();
    }
}

/// Spin until the slot reports DONE. Never parks: the dispatching thread has
/// nothing else to do, and sleeping here would tax the next dispatch.
fn wait_for_work_done(slot: &WorkerSlot) {
    loop {
        let flag = slot.flag_relaxed();
        debug_assert!(
            flag == AVAILABLE || flag == DONE,
            "slot regressed to idle while the dispatcher was waiting"
        );
        if flag == DONE {
            return;
        }
        std::hint::spin_loop();
    }
}

/// The caller-side sequence shared by every mode: hand each slot its span
/// (or the zero-work shortcut), run the caller's own span inline, then
/// collect every DONE and reset the flags.
fn fan_out<S>(state: &PoolState, span_of: S, range_fn: RangeFn, user_data: *const ())
where
    S: Fn(usize, usize) -> Option<Span>,
{
    let workers = state.slots.len();
    let executors = workers + 1;

    for (k, slot) in state.slots.iter().enumerate() {
        match span_of(k, executors) {
            Some(span) => {
                slot.assign(span.first, span.last, range_fn, user_data);
                slot.signal_available();
            }
            None => slot.signal_no_work(),
        }
    }

    // the caller is the last executor and runs its share inline, with the
    // same panic boundary a worker has
    if let Some(span) = span_of(workers, executors) {
        let outcome = catch_unwind(AssertUnwindSafe(|| unsafe {
            range_fn(user_data, span.first, span.last)
        }));
        if let Err(payload) = outcome {
            state.store_panic(payload);
        }
    }

    for slot in state.slots.iter() {
        wait_for_work_done(slot);
        slot.acknowledge_done();
    }
}

pub(crate) fn run_dispatch<F>(state: &PoolState, count: usize, mode: DispatchMode, work: F)
where
    F: Fn(usize) + Sync,
{
    trace!(count, ?mode, "dispatch begin");
    let hot = WakeGuard::raise(state);

    match mode {
        // count == 0 degenerates to the zero-work shortcut on every slot in
        // all three modes; every flag still runs IDLE -> DONE -> IDLE
        _ if count == 0 => fan_out(state, |_, _| None, run_range::<F>, std::ptr::null()),
        DispatchMode::Contiguous => {
            fan_out(
                state,
                |k, executors| partition(count, executors, k),
                run_range::<F>,
                &work as *const F as *const (),
            );
        }
        DispatchMode::PerThread => {
            let full = Span {
                first: 0,
                last: count - 1,
            };
            fan_out(
                state,
                |_, _| Some(full),
                run_range::<F>,
                &work as *const F as *const (),
            );
        }
        DispatchMode::LoadBalancing => {
            state.lb_counter.store(0, Ordering::SeqCst);
            state.lb_bound.store(count as i64, Ordering::SeqCst);
            let job = BalancedJob {
                work: &work,
                counter: &state.lb_counter,
                bound: &state.lb_bound,
            };
            // the per-thread machinery with a one-item description: every
            // executor runs the claiming loop once
            fan_out(
                state,
                |_, _| Some(Span { first: 0, last: 0 }),
                run_balanced::<F>,
                &job as *const BalancedJob<'_, F> as *const (),
            );
            state.lb_counter.store(0, Ordering::SeqCst);
            state.lb_bound.store(0, Ordering::SeqCst);
        }
    }

    drop(hot);
    trace!(count, ?mode, "dispatch end");

    // re-raise the first user panic only after the protocol is idle again,
    // so the pool stays usable
    if let Some(payload) = state.take_panic() {
        resume_unwind(payload);
    }
}
