//! Global process table: `ProcessId -> Process`, the arena every lookup by
//! pid goes through.

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use super::pcb::{Process, ProcessId};

static PROCESSES: Mutex<BTreeMap<ProcessId, Process>> = Mutex::new(BTreeMap::new());
static NEXT_PID: AtomicU32 = AtomicU32::new(1);

pub fn alloc_pid() -> ProcessId {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

pub fn insert(process: Process) {
    PROCESSES.lock().insert(process.pid, process);
}

pub fn remove(pid: ProcessId) -> Option<Process> {
    PROCESSES.lock().remove(&pid)
}

pub fn with_process<R>(pid: ProcessId, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    PROCESSES.lock().get_mut(&pid).map(f)
}

pub fn exists(pid: ProcessId) -> bool {
    PROCESSES.lock().contains_key(&pid)
}

/// Finds every process whose `parent_pid` is `pid`, for reparenting or
/// cascading signals at exit. Returns a snapshot, not a live view.
pub fn children_of(pid: ProcessId) -> alloc::vec::Vec<ProcessId> {
    PROCESSES
        .lock()
        .values()
        .filter(|p| p.parent_pid == Some(pid))
        .map(|p| p.pid)
        .collect()
}
