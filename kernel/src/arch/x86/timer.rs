//! Tick counter. The PIT/PIC bring-up that drives `tick()` from a real
//! timer interrupt is an external collaborator; this module only owns the
//! counter the scheduler and `sleep` read.

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Called from the timer ISR once per tick.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Returns the number of timer ticks since boot.
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}
