//! Synchronization primitives for kernel singletons.
//!
//! Every process-wide singleton named in the design (the frame bitmap, the
//! kernel heap, the block-device registry, the mount table, the ready
//! queues, current-process/current-thread) is a [`spin::Mutex`] or
//! [`lazy_static`]-guarded static. There is no SMP in this design, so a
//! spinlock only ever contends with an interrupt handler on the same CPU;
//! [`without_interrupts`] is the discipline that makes that safe.

pub use spin::{Mutex, MutexGuard};

/// Runs `f` with interrupts disabled, restoring the prior interrupt flag
/// on return. Used to bracket mutation of scheduler/allocator singletons
/// that are also touched from interrupt context.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let was_enabled = crate::arch::interrupts::are_enabled();
    if was_enabled {
        crate::arch::interrupts::disable();
    }
    let result = f();
    if was_enabled {
        crate::arch::interrupts::enable();
    }
    result
}
