//! Process control block: the per-process state the table indexes by pid.

use alloc::{string::String, vec::Vec};

use crate::{mm::vmm::AddressSpace, sched::ThreadId};

pub type ProcessId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Zombie,
}

pub struct Process {
    pub pid: ProcessId,
    pub parent_pid: Option<ProcessId>,
    pub name: String,
    pub address_space: AddressSpace,
    pub threads: Vec<ThreadId>,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    /// Thread of this process currently blocked in `wait`, if any. Woken
    /// by a child's exit.
    pub waiting_tid: Option<ThreadId>,
}

impl Process {
    pub fn new(pid: ProcessId, parent_pid: Option<ProcessId>, name: String, address_space: AddressSpace) -> Self {
        Self {
            pid,
            parent_pid,
            name,
            address_space,
            threads: Vec::new(),
            state: ProcessState::Running,
            exit_code: None,
            waiting_tid: None,
        }
    }
}
