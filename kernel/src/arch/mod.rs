//! Architecture-specific primitives.
//!
//! This build targets 32-bit x86 only (Non-goal: 64-bit addressing). GDT/IDT
//! bring-up, the PIT/PIC, and the keyboard/VGA drivers are external
//! collaborators; this module owns only the handful of privileged
//! instructions the core components need directly: interrupt enable/disable
//! for the critical sections in [`crate::sync`], TLB invalidation paired
//! with every page-table edit, and the timer tick counter.

#[cfg(target_arch = "x86")]
pub mod x86;

#[cfg(target_arch = "x86")]
pub use x86::*;

#[cfg(not(target_arch = "x86"))]
mod host_stub;

#[cfg(not(target_arch = "x86"))]
pub use host_stub::*;
