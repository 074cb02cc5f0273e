//! Boot-message print macros.
//!
//! The VGA text-mode writer is an external collaborator; the core only
//! needs somewhere to put boot-stage messages, so `print!`/`println!` are
//! aliases for the serial writer.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::serial::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
