//! Stand-ins for [`x86`] used when host-side unit tests are compiled for
//! the development machine's native target rather than 32-bit x86. None of
//! these back real hardware; they exist only so logic that calls through
//! `crate::arch::*` links on the host. The bare-metal image always uses
//! [`x86`] instead.

pub mod interrupts {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);

    pub fn disable() {
        ENABLED.store(false, Ordering::SeqCst);
    }

    pub fn enable() {
        ENABLED.store(true, Ordering::SeqCst);
    }

    pub fn are_enabled() -> bool {
        ENABLED.load(Ordering::SeqCst)
    }
}

pub mod tlb {
    pub fn flush_address(_vaddr: u32) {}
    pub fn flush_all() {}
}

pub mod timer {
    use core::sync::atomic::{AtomicU64, Ordering};

    static TICKS: AtomicU64 = AtomicU64::new(0);

    pub fn tick() {
        TICKS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_ticks() -> u64 {
        TICKS.load(Ordering::Relaxed)
    }
}

pub mod vmm {
    pub fn load_page_directory(_phys: u32) {}
}

pub mod context {
    /// Host stand-in for [`super::super::x86::context::Context`]. Host
    /// unit tests exercise scheduling decisions (which thread runs next),
    /// not the actual machine-level stack switch, so no real register
    /// state is tracked here.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Context;

    impl Context {
        pub fn new_kernel_thread(_stack_top: u32, _entry: extern "C" fn() -> !) -> Self {
            Self
        }
    }

    /// # Safety
    /// No-op on the host; real stack switching only happens on the
    /// bare-metal target.
    pub unsafe extern "C" fn switch(_from: *mut Context, _to: *const Context) {}

    /// # Safety
    /// Never actually called on the host; ring 3 entry only exists on the
    /// bare-metal target.
    pub unsafe fn enter_user_mode(_entry: u32, _stack: u32) -> ! {
        unreachable!("ring 3 entry is bare-metal only")
    }
}

pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
