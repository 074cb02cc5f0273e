//! Preemptive priority-FIFO scheduler (C4): eleven fixed priority levels,
//! FIFO within a level, preempted by the timer and by a higher-priority
//! thread becoming ready.

pub mod queue;
pub mod scheduler;
pub mod task;

pub use scheduler::{
    block_current, current_tid, exit_current, fork_thread, init, pid_of, priority_of, reap, spawn_kernel_thread,
    tick, wake, yield_now,
};
pub use task::{Priority, ProcessId, Thread, ThreadId, ThreadState, PRI_DEFAULT, PRI_MAX, PRI_MIN, TIMESLICE_DEFAULT};

/// Enters the scheduler's main loop. Only returns if every thread,
/// including idle, has exited, which does not happen in practice.
pub fn run() -> ! {
    log::info!("[C4] entering scheduler loop");
    loop {
        yield_now();
    }
}
