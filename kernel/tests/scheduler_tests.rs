//! Bare-metal scheduler tests: thread creation, fork, wake, and priority
//! clamping, run against the real scheduler singleton rather than a host
//! mock.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(leanix_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use leanix_kernel::{
    error::KernelError,
    sched::{self, PRI_DEFAULT, PRI_MAX, PRI_MIN},
    test_panic_handler,
};

#[path = "common/mod.rs"]
mod common;

extern "C" fn worker_entry() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Scheduler");
    test_main();
    leanix_kernel::arch::halt()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

#[test_case]
fn init_creates_idle_thread() -> Result<(), KernelError> {
    sched::init();
    assert!(sched::current_tid().is_some());
    Ok(())
}

#[test_case]
fn spawn_kernel_thread_is_distinct_from_idle() -> Result<(), KernelError> {
    sched::init();
    let idle = sched::current_tid().unwrap();
    let worker = sched::spawn_kernel_thread(1, PRI_DEFAULT, worker_entry);
    assert_ne!(worker, idle);
    assert_eq!(sched::pid_of(worker), Some(1));
    Ok(())
}

#[test_case]
fn out_of_range_priority_falls_back_to_default() -> Result<(), KernelError> {
    sched::init();
    let too_high = sched::spawn_kernel_thread(2, PRI_MAX + 100, worker_entry);
    assert_eq!(sched::priority_of(too_high), Some(PRI_DEFAULT));

    let too_low = sched::spawn_kernel_thread(3, PRI_MIN - 100, worker_entry);
    assert_eq!(sched::priority_of(too_low), Some(PRI_DEFAULT));
    Ok(())
}

#[test_case]
fn fork_thread_copies_pid() -> Result<(), KernelError> {
    sched::init();
    let parent = sched::current_tid().unwrap();
    let child = sched::fork_thread(parent, 42).expect("fork_thread");
    assert_eq!(sched::pid_of(child), Some(42));
    assert!(sched::priority_of(child).is_some());
    Ok(())
}

#[test_case]
fn wake_unknown_thread_is_an_error() -> Result<(), KernelError> {
    sched::init();
    assert!(sched::wake(0xDEAD).is_err());
    Ok(())
}
