//! Thread representation and the fixed priority band.

use alloc::boxed::Box;

use crate::arch::context::Context;

/// Lowest priority a thread may run at.
pub const PRI_MIN: i32 = 0;
/// Highest priority a thread may run at.
pub const PRI_MAX: i32 = 10;
/// Priority newly created threads get unless told otherwise.
pub const PRI_DEFAULT: i32 = 5;
/// Number of distinct priority levels (`PRI_MAX - PRI_MIN + 1`).
pub const PRIORITY_LEVELS: usize = (PRI_MAX - PRI_MIN + 1) as usize;
/// Ticks a thread runs for before the scheduler considers preempting it
/// in favor of another ready thread at the same priority.
pub const TIMESLICE_DEFAULT: u32 = 5;
/// Size of each thread's kernel stack.
pub const KSTACK_SIZE: usize = 4096;

pub type ThreadId = u32;
pub type ProcessId = u32;
pub type Priority = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// One schedulable thread of execution.
pub struct Thread {
    pub tid: ThreadId,
    pub pid: ProcessId,
    pub priority: i32,
    pub state: ThreadState,
    pub time_slice: u32,
    pub context: Context,
    /// Kernel stack backing this thread's execution. Kept alive for the
    /// thread's whole lifetime; freed when the `Thread` is dropped.
    kernel_stack: Box<[u8; KSTACK_SIZE]>,
    pub exit_code: Option<i32>,
}

impl Thread {
    /// `priority` is clamped into `[PRI_MIN, PRI_MAX]`.
    pub fn new_kernel_thread(tid: ThreadId, pid: ProcessId, priority: i32, entry: extern "C" fn() -> !) -> Self {
        let mut kernel_stack = Box::new([0u8; KSTACK_SIZE]);
        let stack_top = kernel_stack.as_mut_ptr() as u32 + KSTACK_SIZE as u32;
        let context = Context::new_kernel_thread(stack_top, entry);
        Self {
            tid,
            pid,
            priority: priority.clamp(PRI_MIN, PRI_MAX),
            state: ThreadState::Ready,
            time_slice: TIMESLICE_DEFAULT,
            context,
            kernel_stack,
            exit_code: None,
        }
    }

    /// Builds a child thread by copying `parent`'s entire kernel stack and
    /// adjusting its saved stack pointer by the same offset, so resuming
    /// the child replays whatever call chain (ultimately a trap return
    /// into user mode) was frozen on the parent's stack at fork time.
    /// Used by `fork`.
    pub fn fork_from(tid: ThreadId, pid: ProcessId, parent: &Thread) -> Self {
        let mut kernel_stack = Box::new([0u8; KSTACK_SIZE]);
        kernel_stack.copy_from_slice(parent.kernel_stack.as_ref());

        let parent_base = parent.kernel_stack.as_ptr() as i64;
        let child_base = kernel_stack.as_ptr() as i64;
        let delta = child_base - parent_base;

        let mut context = parent.context;
        context.esp = (context.esp as i64 + delta) as u32;

        Self {
            tid,
            pid,
            priority: parent.priority,
            state: ThreadState::Ready,
            time_slice: TIMESLICE_DEFAULT,
            context,
            kernel_stack,
            exit_code: None,
        }
    }
}
