//! Single-CPU priority-FIFO scheduler: picks the highest-priority ready
//! thread, runs it until it blocks, yields, exits, or exhausts its
//! timeslice, then repeats.

use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::{
    arch::context,
    error::{KernelError, SchedError},
};

use super::{
    queue::ReadyQueue,
    task::{Thread, ThreadId, ThreadState, PRI_DEFAULT, TIMESLICE_DEFAULT},
};

/// Global scheduler state: the thread arena (indexed by [`ThreadId`], per
/// the arena-plus-index ownership model) and the ready queue.
pub struct Scheduler {
    threads: BTreeMap<ThreadId, Thread>,
    ready: ReadyQueue,
    current: Option<ThreadId>,
    next_tid: ThreadId,
    idle_tid: ThreadId,
}

extern "C" fn idle_entry() -> ! {
    loop {
        crate::arch::halt();
    }
}

impl Scheduler {
    fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
            ready: ReadyQueue::new(),
            current: None,
            next_tid: 1,
            idle_tid: 0,
        }
    }

    fn alloc_tid(&mut self) -> ThreadId {
        let tid = self.next_tid;
        self.next_tid += 1;
        tid
    }

    /// Registers a kernel thread and enqueues it as ready. Returns its id.
    pub fn spawn_kernel_thread(&mut self, pid: super::task::ProcessId, priority: i32, entry: extern "C" fn() -> !) -> ThreadId {
        let tid = self.alloc_tid();
        let thread = Thread::new_kernel_thread(tid, pid, priority, entry);
        let prio = thread.priority;
        self.threads.insert(tid, thread);
        self.ready.push(tid, prio);
        tid
    }

    /// Duplicates `parent_tid`'s kernel stack and context into a fresh
    /// thread owned by `child_pid`, ready to run. Used by fork.
    pub fn fork_thread(&mut self, parent_tid: ThreadId, child_pid: super::task::ProcessId) -> Option<ThreadId> {
        let parent = self.threads.get(&parent_tid)?;
        let tid = self.alloc_tid();
        let child = Thread::fork_from(tid, child_pid, parent);
        let prio = child.priority;
        self.threads.insert(tid, child);
        self.ready.push(tid, prio);
        Some(tid)
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    pub fn thread_mut(&mut self, tid: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&tid)
    }

    /// Marks `tid` ready and enqueues it, e.g. after it was woken from a
    /// block or newly created.
    pub fn make_ready(&mut self, tid: ThreadId) -> Result<(), SchedError> {
        let thread = self.threads.get_mut(&tid).ok_or(SchedError::ThreadNotFound { tid })?;
        thread.state = ThreadState::Ready;
        thread.time_slice = TIMESLICE_DEFAULT;
        let priority = thread.priority;
        self.ready.push(tid, priority);
        Ok(())
    }

    pub fn block_current(&mut self) {
        if let Some(tid) = self.current {
            if let Some(thread) = self.threads.get_mut(&tid) {
                thread.state = ThreadState::Blocked;
            }
        }
    }

    /// Removes a thread entirely (after it has been reaped by `wait`).
    pub fn remove(&mut self, tid: ThreadId) -> Option<Thread> {
        self.threads.remove(&tid)
    }

    /// Called once per timer tick for the running thread; returns `true`
    /// if its timeslice ran out and a reschedule should happen.
    pub fn tick_current(&mut self) -> bool {
        let Some(tid) = self.current else { return false };
        let Some(thread) = self.threads.get_mut(&tid) else { return false };
        if thread.time_slice > 0 {
            thread.time_slice -= 1;
        }
        thread.time_slice == 0
    }

    /// Picks the next thread to run (the idle thread if nothing else is
    /// ready) and performs the context switch into it. Returns the id of
    /// the thread switched away from, if any.
    fn switch_to_next(&mut self) -> Option<ThreadId> {
        let prev_tid = self.current;

        if let Some(tid) = prev_tid {
            if let Some(thread) = self.threads.get(&tid) {
                if thread.state == ThreadState::Running {
                    // still runnable: re-enqueue behind equal-priority peers.
                    let priority = thread.priority;
                    self.ready.push(tid, priority);
                    self.threads.get_mut(&tid).unwrap().state = ThreadState::Ready;
                }
            }
        }

        let next_tid = self.ready.pop_highest().unwrap_or(self.idle_tid);
        self.threads.get_mut(&next_tid).unwrap().state = ThreadState::Running;
        self.threads.get_mut(&next_tid).unwrap().time_slice = TIMESLICE_DEFAULT;
        self.current = Some(next_tid);

        if prev_tid == Some(next_tid) {
            return prev_tid;
        }

        // SAFETY: both pointers come from entries of `self.threads`, which
        // outlive this call; `prev`/`next` do not alias since `prev_tid !=
        // next_tid`.
        unsafe {
            let prev_ctx: *mut context::Context = match prev_tid {
                Some(tid) => &mut self.threads.get_mut(&tid).unwrap().context,
                None => core::ptr::null_mut(),
            };
            let next_ctx: *const context::Context = &self.threads.get(&next_tid).unwrap().context;
            if prev_ctx.is_null() {
                let mut scratch = context::Context::default();
                context::switch(&mut scratch, next_ctx);
            } else {
                context::switch(prev_ctx, next_ctx);
            }
        }

        prev_tid
    }
}

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

/// Builds the scheduler and its idle thread.
pub fn init() {
    let mut scheduler = Scheduler::new();
    let idle_tid = scheduler.alloc_tid();
    let idle = Thread::new_kernel_thread(idle_tid, 0, super::task::PRI_MIN, idle_entry);
    scheduler.idle_tid = idle_tid;
    scheduler.threads.insert(idle_tid, idle);
    scheduler.current = Some(idle_tid);
    scheduler.threads.get_mut(&idle_tid).unwrap().state = ThreadState::Running;
    *SCHEDULER.lock() = Some(scheduler);
    log::info!("[C4] scheduler ready, idle thread tid={}", idle_tid);
}

/// Spawns a new kernel thread at `priority` (defaults to
/// [`super::task::PRI_DEFAULT`] if out of range) and marks it ready.
pub fn spawn_kernel_thread(pid: super::task::ProcessId, priority: i32, entry: extern "C" fn() -> !) -> ThreadId {
    let priority = if (super::task::PRI_MIN..=super::task::PRI_MAX).contains(&priority) {
        priority
    } else {
        PRI_DEFAULT
    };
    with_scheduler(|s| s.spawn_kernel_thread(pid, priority, entry))
}

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    crate::sync::without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        f(guard.as_mut().expect("scheduler not initialized"))
    })
}

/// Returns the currently running thread's id.
pub fn current_tid() -> Option<ThreadId> {
    with_scheduler(|s| s.current())
}

/// Voluntarily gives up the remainder of the current timeslice.
pub fn yield_now() {
    with_scheduler(|s| {
        s.switch_to_next();
    });
}

/// Called from the timer ISR. Decrements the current thread's timeslice
/// and reschedules if it has run out, implementing preemption.
pub fn tick() {
    let expired = with_scheduler(|s| s.tick_current());
    if expired {
        yield_now();
    }
}

/// Blocks the current thread (e.g. waiting on I/O or a child) and
/// schedules another.
pub fn block_current() {
    with_scheduler(|s| {
        s.block_current();
        s.switch_to_next();
    });
}

/// Wakes a blocked thread, making it ready again.
pub fn wake(tid: ThreadId) -> Result<(), KernelError> {
    with_scheduler(|s| s.make_ready(tid)).map_err(KernelError::from)
}

/// Marks the current thread a zombie with `code` and switches away from
/// it permanently; its `Thread` stays in the arena until reaped by
/// [`reap`].
pub fn exit_current(code: i32) -> ! {
    with_scheduler(|s| {
        let tid = s.current().expect("exit with no current thread");
        let thread = s.thread_mut(tid).unwrap();
        thread.state = ThreadState::Terminated;
        thread.exit_code = Some(code);
        s.switch_to_next();
    });
    unreachable!("exited thread was rescheduled")
}

/// Removes a zombie thread's `Thread` from the arena, returning its exit
/// code.
pub fn reap(tid: ThreadId) -> Option<i32> {
    with_scheduler(|s| {
        let thread = s.threads.get(&tid)?;
        if thread.state != ThreadState::Terminated {
            return None;
        }
        s.remove(tid).and_then(|t| t.exit_code)
    })
}

pub fn priority_of(tid: ThreadId) -> Option<i32> {
    with_scheduler(|s| s.thread(tid).map(|t| t.priority))
}

pub fn pid_of(tid: ThreadId) -> Option<super::task::ProcessId> {
    with_scheduler(|s| s.thread(tid).map(|t| t.pid))
}

/// Forks `parent_tid` into a new thread owned by `child_pid`.
pub fn fork_thread(parent_tid: ThreadId, child_pid: super::task::ProcessId) -> Option<ThreadId> {
    with_scheduler(|s| s.fork_thread(parent_tid, child_pid))
}
