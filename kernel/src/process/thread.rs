//! Per-thread user-mode entry point bookkeeping.
//!
//! The scheduler's [`Thread`](crate::sched::Thread) only knows how to
//! resume a kernel-mode context; a process's main thread instead needs to
//! land in ring 3 the first time it runs. This side table records where,
//! keyed by thread id, so the generic trampoline in
//! [`super::lifecycle`] can look it up.

use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::{mm::VirtAddr, sched::ThreadId};

static USER_ENTRIES: Mutex<BTreeMap<ThreadId, (VirtAddr, VirtAddr)>> = Mutex::new(BTreeMap::new());

pub fn record_user_entry(tid: ThreadId, entry: VirtAddr, stack: VirtAddr) {
    USER_ENTRIES.lock().insert(tid, (entry, stack));
}

/// Removes and returns the recorded `(entry, stack)` for `tid`, consumed
/// the first (and only) time the trampoline runs.
pub fn take_user_entry(tid: ThreadId) -> Option<(VirtAddr, VirtAddr)> {
    USER_ENTRIES.lock().remove(&tid)
}
