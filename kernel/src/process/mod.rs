//! Process lifecycle (C4 support): the process control block, the global
//! process table, and creation/fork/exec/exit/wait.

pub mod lifecycle;
pub mod pcb;
pub mod table;
pub mod thread;

pub use lifecycle::{create_process, exec_process, exit_process, fork_process, wait_process, USER_STACK_SIZE, USER_STACK_TOP};
pub use pcb::{Process, ProcessId, ProcessState};

/// Upper bound on live processes, matching the table's pid allocation
/// range.
pub const MAX_PROCESSES: usize = 4096;

/// Returns the pid of the process the currently running thread belongs
/// to.
pub fn current_pid() -> Option<ProcessId> {
    crate::sched::current_tid().and_then(crate::sched::pid_of)
}

/// Builds the first process (pid 1) from `init_image` and starts the
/// scheduler running it. Called once at boot after [`crate::sched::init`].
pub fn init(init_image: &[u8]) -> Result<ProcessId, crate::error::KernelError> {
    let pid = create_process("init", init_image, None)?;
    log::info!("[C4] init process created, pid={}", pid);
    Ok(pid)
}
