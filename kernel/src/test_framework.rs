//! Bare-metal test harness: runs `#[test_case]` functions under QEMU and
//! reports results over the serial port, since the host test runner is
//! unavailable for code that only compiles against the `x86` target.

use core::panic::PanicInfo;

use crate::{error::KernelError, serial_print, serial_println};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Implemented by every `#[test_case]` function: a plain `fn()` or a
/// fallible `fn() -> Result<(), KernelError>`.
pub trait Testable {
    fn run(&self) -> Result<(), KernelError>;
}

impl<T> Testable for T
where
    T: Fn() -> Result<(), KernelError>,
{
    fn run(&self) -> Result<(), KernelError> {
        serial_print!("{}...\t", core::any::type_name::<T>());
        match self() {
            Ok(()) => {
                serial_println!("[ok]");
                Ok(())
            }
            Err(e) => {
                serial_println!("[failed]: {}", e);
                Err(e)
            }
        }
    }
}

/// The `#[test_runner]` for every bare-metal test binary: each links
/// against this crate as a plain dependency, so `test_runner` has to be
/// unconditionally compiled rather than gated behind this crate's own
/// `cfg(test)`.
pub fn test_runner(tests: &[&dyn Testable]) -> ! {
    serial_println!("Running {} tests", tests.len());
    let mut passed = 0;
    let mut failed = 0;

    for test in tests {
        match test.run() {
            Ok(()) => passed += 1,
            Err(_) => failed += 1,
        }
    }

    serial_println!("\nTest Results: {} passed, {} failed", passed, failed);
    if failed == 0 {
        exit_qemu(QemuExitCode::Success);
    } else {
        exit_qemu(QemuExitCode::Failed);
    }
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
}

/// Exits QEMU via the `isa-debug-exit` device at port 0xf4.
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    #[cfg(target_arch = "x86")]
    // SAFETY: port 0xf4 is the `isa-debug-exit` device configured for this
    // target's QEMU invocation; writing to it halts the VM, so control
    // never returns here.
    unsafe {
        core::arch::asm!("out dx, eax", in("dx") 0xf4u16, in("eax") exit_code as u32, options(nomem, nostack));
        core::hint::unreachable_unchecked();
    }

    #[cfg(not(target_arch = "x86"))]
    {
        let _ = exit_code;
        loop {
            core::hint::spin_loop();
        }
    }
}
