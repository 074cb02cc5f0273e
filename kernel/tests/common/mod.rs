//! Shared setup for the bare-metal test binaries.

use leanix_kernel::serial_println;

/// Prints a banner identifying which suite is running, the way each test
/// binary's `_start` does before handing off to the custom test runner.
pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {} Test Suite ===", subsystem);
}

#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => {
                leanix_kernel::serial_println!("Assertion failed: {} is not Ok", e);
                panic!("expected Ok, got Err");
            }
        }
    };
}

#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(_) => {
                leanix_kernel::serial_println!("Assertion failed: result is Ok");
                panic!("expected Err, got Ok");
            }
            Err(e) => e,
        }
    };
}
