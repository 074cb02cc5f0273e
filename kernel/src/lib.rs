//! Kernel library: the engineering core shared between the bare-metal
//! binary and the host-side test harness.
//!
//! Bare metal and host builds diverge in exactly two ways: the global
//! allocator (the buddy-backed kernel heap vs. the host's system
//! allocator) and the presence of a `_start`/`panic_handler` pair, which
//! only the bare-metal test harness needs. Everything else — frame
//! allocator, VMM, scheduler, process/thread lifecycle, ELF loader, block
//! devices, VFS and its two backends — compiles and is unit-testable on
//! both.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_framework::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

extern crate alloc;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: mm::heap::LockedHeap = mm::heap::LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod elf;
pub mod error;
pub mod fs;
pub mod mm;
pub mod process;
pub mod raii;
pub mod sched;
pub mod serial;
pub mod sync;

mod test_framework;

#[cfg(test)]
mod integration_tests;

pub use error::{FsError, KernelError, KernelResult, SchedError};
pub use mm::{PhysAddr, VirtAddr, FRAME_SIZE};
pub use sched::{Priority, Thread};
pub use test_framework::{exit_qemu, test_panic_handler, test_runner, QemuExitCode, Testable};

/// Memory map entry format handed to [`mm::init`] by the bootloader (an
/// external collaborator). Re-exported so integration tests can build one.
pub use mm::MemoryRegion;

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    arch::halt()
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler. Panic is intentional: heap allocation
/// failure in a no_std kernel is unrecoverable. The alloc_error_handler ABI
/// requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
