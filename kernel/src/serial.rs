//! Serial port writer backing the `log` facade and the boot-time println!.
//!
//! The PIT/PIC/IDT bring-up needed to drive this from an interrupt is an
//! external collaborator; this module only owns the UART transmit path.

use core::fmt;

use spin::Mutex;
use uart_16550::SerialPort;

const COM1_BASE: u16 = 0x3F8;

lazy_static::lazy_static! {
    static ref SERIAL1: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(COM1_BASE) };
        port.init();
        Mutex::new(port)
    };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    SERIAL1.lock().write_fmt(args).expect("serial write failed");
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::serial::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
