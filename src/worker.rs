use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::context;
use crate::platform;
use crate::pool::PoolState;
use crate::slot::AVAILABLE;

/// Spin budget before a worker considers yielding and parking, in cycle
/// counter units. 65_536 cycles is ~13us on a 5GHz core: back-to-back
/// dispatches inside that window never pay a context switch.
const SPIN_CYCLES: u64 = 65_536;

/// Hook invoked once per worker at the beginning and end of its life.
pub type WorkerHook = Arc<dyn Fn(&mut WorkerEnv<'_>) + Send + Sync>;

/// What a lifecycle hook sees of the worker it runs on.
pub struct WorkerEnv<'a> {
    /// 0-based executor index of this worker.
    pub thread_index: usize,
    /// The worker's scratch arena, `per_thread_scratch_bytes` long. Its
    /// contents persist from `on_start` to `on_end`.
    pub scratch: &'a mut [u8],
    /// The `starting_context` the pool was initialized with, if any.
    pub starting_context: Option<&'a (dyn Any + Send + Sync)>,
}

pub(crate) fn spawn_worker(index: usize, state: Arc<PoolState>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("dp{}", index))
        .spawn(move || worker_loop(index, state))
}

fn run_hook(hook: &Option<WorkerHook>, index: usize, scratch: &mut [u8], state: &PoolState) {
    if let Some(hook) = hook.as_deref() {
        let mut env = WorkerEnv {
            thread_index: index,
            scratch,
            starting_context: state.starting_context.as_deref(),
        };
        hook(&mut env);
    }
}

fn worker_loop(index: usize, state: Arc<PoolState>) {
    context::bind_thread_index(index as isize);
    let mut scratch = vec![0u8; state.scratch_bytes];
    run_hook(&state.on_start, index, &mut scratch, &state);
    debug!(thread_index = index, "worker up");

    let slot = &state.slots[index];
    loop {
        // Wait for the next assignment. Spin first so a burst of dispatches
        // is absorbed without sleeping, yield once per exhausted budget, and
        // only park while the wake hint reads zero. Spurious futex returns
        // just land back in the spin phase.
        let available = 'wait: loop {
            let mut spin_start = platform::cycle_count();
            let mut last_flag = slot.flag_relaxed();
            loop {
                if slot.stop_requested() {
                    break 'wait false;
                }
                let flag = slot.flag_relaxed();
                if flag == AVAILABLE {
                    break 'wait true;
                }
                // any flag activity (a zero-work DONE/IDLE flip included)
                // means dispatches are flowing; restart the budget so a
                // burst never pushes an unengaged worker through the gate
                if flag != last_flag {
                    last_flag = flag;
                    spin_start = platform::cycle_count();
                }
                std::hint::spin_loop();
                if platform::cycle_count().wrapping_sub(spin_start) >= SPIN_CYCLES {
                    break;
                }
            }
            platform::yield_now();
            if state.wake_hint.load(Ordering::SeqCst) == 0 {
                platform::wait_while_equals(&state.wake_hint, 0);
                state.parks.fetch_add(1, Ordering::Relaxed);
            }
        };
        if !available {
            break;
        }

        // the relaxed spin observed the dispatcher's release exchange; this
        // fence publishes the staged range and trampoline fields
        fence(Ordering::Acquire);
        let (first, last, range_fn, user_data) = slot.assignment();

        let outcome = catch_unwind(AssertUnwindSafe(|| unsafe {
            range_fn(user_data, first, last)
        }));
        if let Err(payload) = outcome {
            state.store_panic(payload);
        }

        // done must be signalled on every exit path, or the dispatcher's
        // wait would never finish
        slot.signal_done();
    }

    run_hook(&state.on_end, index, &mut scratch, &state);
    debug!(thread_index = index, "worker down");
}
