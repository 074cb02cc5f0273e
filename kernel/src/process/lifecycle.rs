//! Process creation, fork, exec, exit, and wait.

use alloc::string::String;

use crate::{
    elf,
    error::{KernelError, SchedError},
    mm::{page_table::PageFlags, vmm, VirtAddr},
    sched::{self, ThreadId},
};

use super::{
    pcb::{Process, ProcessId, ProcessState},
    table,
};

/// Top of the user stack region; the stack grows down from here.
pub const USER_STACK_TOP: u32 = crate::mm::PHYSMAP_BASE - crate::mm::FRAME_SIZE as u32;
/// Default user stack size.
pub const USER_STACK_SIZE: usize = 64 * 1024;

extern "C" fn user_entry_trampoline() -> ! {
    let tid = sched::current_tid().expect("running thread has no tid");
    let (entry, stack) = super::thread::take_user_entry(tid).expect("thread has no recorded user entry");
    // SAFETY: `entry`/`stack` were validated by the ELF loader and the
    // stack mapping in `create_process`; this hands off to ring 3 through
    // the external GDT/TSS-configured privilege transition.
    unsafe {
        crate::arch::context::enter_user_mode(entry.as_u32(), stack.as_u32());
    }
}

/// Creates a fresh process from an ELF image: a new address space, a
/// mapped user stack, and one thread that starts at the image's entry
/// point at [`crate::sched::PRI_DEFAULT`].
pub fn create_process(name: &str, image: &[u8], parent_pid: Option<ProcessId>) -> Result<ProcessId, KernelError> {
    let pid = table::alloc_pid();
    let mut space = vmm::new_user_space().map_err(|_| KernelError::OutOfMemory { requested: 0, available: 0 })?;

    space.activate();
    let loaded = elf::load(image, &mut space)?;

    let stack_base = VirtAddr::new(USER_STACK_TOP - USER_STACK_SIZE as u32);
    space
        .map_anonymous(stack_base, USER_STACK_SIZE, PageFlags::USER | PageFlags::WRITABLE)
        .map_err(|_| KernelError::OutOfMemory { requested: USER_STACK_SIZE, available: 0 })?;

    let mut process = Process::new(pid, parent_pid, String::from(name), space);

    let tid = sched::spawn_kernel_thread(pid, sched::PRI_DEFAULT, user_entry_trampoline);
    super::thread::record_user_entry(tid, loaded.entry, VirtAddr::new(USER_STACK_TOP));
    process.threads.push(tid);

    table::insert(process);
    Ok(pid)
}

/// Duplicates the calling process: a deep copy of its address space and a
/// child thread whose kernel stack is a copy of the calling thread's (see
/// [`crate::sched::Thread::fork_from`]), so resuming the child replays
/// whatever was frozen on that stack at the moment of the call.
pub fn fork_process(parent_pid: ProcessId, calling_tid: ThreadId) -> Result<ProcessId, KernelError> {
    let child_pid = table::alloc_pid();

    let (child_space, parent_name) = table::with_process(parent_pid, |parent| {
        Ok::<_, KernelError>((
            parent.address_space.clone_address_space().map_err(|_| KernelError::OutOfMemory { requested: 0, available: 0 })?,
            parent.name.clone(),
        ))
    })
    .ok_or(KernelError::from(SchedError::ProcessNotFound { pid: parent_pid }))??;

    let child_tid = sched::fork_thread(calling_tid, child_pid).ok_or(KernelError::from(SchedError::ThreadNotFound { tid: calling_tid }))?;

    let mut child = Process::new(child_pid, Some(parent_pid), parent_name, child_space);
    child.threads.push(child_tid);
    table::insert(child);

    Ok(child_pid)
}

/// Replaces the calling process's address space contents with a new ELF
/// image. The calling thread keeps its id; only its user entry point and
/// stack change.
pub fn exec_process(pid: ProcessId, image: &[u8]) -> Result<(), KernelError> {
    let tid = sched::current_tid().ok_or(KernelError::from(SchedError::ThreadNotFound { tid: 0 }))?;

    table::with_process(pid, |process| {
        process.address_space.activate();
        let loaded = elf::load(image, &mut process.address_space)?;
        let stack_base = VirtAddr::new(USER_STACK_TOP - USER_STACK_SIZE as u32);
        process
            .address_space
            .map_anonymous(stack_base, USER_STACK_SIZE, PageFlags::USER | PageFlags::WRITABLE)
            .map_err(|_| KernelError::OutOfMemory { requested: USER_STACK_SIZE, available: 0 })?;
        super::thread::record_user_entry(tid, loaded.entry, VirtAddr::new(USER_STACK_TOP));
        Ok(())
    })
    .ok_or(KernelError::from(SchedError::ProcessNotFound { pid }))?
}

/// Terminates the calling process: marks it a zombie, records `code`, and
/// wakes its parent if it is blocked in `wait`. Does not return.
pub fn exit_process(pid: ProcessId, code: i32) -> ! {
    let parent_pid = table::with_process(pid, |process| {
        process.state = ProcessState::Zombie;
        process.exit_code = Some(code);
        process.parent_pid
    })
    .flatten();

    if let Some(parent_pid) = parent_pid {
        let woke = table::with_process(parent_pid, |parent| parent.waiting_tid.take());
        if let Some(Some(tid)) = woke {
            let _ = sched::wake(tid);
        }
    }

    sched::exit_current(code)
}

/// Blocks until `pid` (or, if `None`, any child of `waiter_pid`) becomes a
/// zombie, then reaps it and returns `(child_pid, exit_code)`.
pub fn wait_process(waiter_pid: ProcessId, waiter_tid: ThreadId, pid: Option<ProcessId>) -> Result<(ProcessId, i32), KernelError> {
    loop {
        let candidates = match pid {
            Some(pid) => alloc::vec![pid],
            None => table::children_of(waiter_pid),
        };
        if candidates.is_empty() {
            return Err(KernelError::NotFound { resource: "child process" });
        }

        for candidate in candidates {
            let zombie_code = table::with_process(candidate, |child| {
                (child.state == ProcessState::Zombie).then_some(child.exit_code.unwrap_or(0))
            })
            .flatten();
            if let Some(code) = zombie_code {
                if let Some(process) = table::remove(candidate) {
                    for tid in &process.threads {
                        sched::reap(*tid);
                    }
                    process.address_space.destroy();
                }
                return Ok((candidate, code));
            }
        }

        table::with_process(waiter_pid, |p| p.waiting_tid = Some(waiter_tid));
        sched::block_current();
    }
}
