//! RAII wrappers for kernel resources: ensure frames, mapped regions, and
//! locks are released when a scope ends rather than relying on an explicit
//! free call at every exit path.

use core::ops::{Deref, DerefMut};

use spin::MutexGuard;

use crate::mm::{frame_allocator, vmm::AddressSpace, PhysAddr, VirtAddr};

/// Owns a single physical frame and returns it to the frame allocator when
/// dropped.
pub struct FrameGuard {
    frame: PhysAddr,
}

impl FrameGuard {
    pub fn new(frame: PhysAddr) -> Self {
        Self { frame }
    }

    pub fn addr(&self) -> PhysAddr {
        self.frame
    }

    /// Releases ownership of the frame without freeing it.
    pub fn leak(self) -> PhysAddr {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        frame_allocator::free_frame(self.frame);
    }
}

/// Owns a mapped virtual memory region and unmaps it from `space` when
/// dropped.
pub struct MappedRegion<'a> {
    space: &'a mut AddressSpace,
    virt: VirtAddr,
    len: usize,
}

impl<'a> MappedRegion<'a> {
    pub fn new(space: &'a mut AddressSpace, virt: VirtAddr, len: usize) -> Self {
        Self { space, virt, len }
    }

    pub fn addr(&self) -> VirtAddr {
        self.virt
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedRegion<'_> {
    fn drop(&mut self) {
        self.space.unmap(self.virt, self.len);
    }
}

/// A lock guard that logs acquisition and release, useful for diagnosing
/// lock-ordering bugs in the scheduler and VFS.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    name: &'static str,
}

impl<'a, T> TrackedMutexGuard<'a, T> {
    pub fn new(guard: MutexGuard<'a, T>, name: &'static str) -> Self {
        log::trace!("acquired lock: {}", name);
        Self { guard, name }
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        log::trace!("released lock: {}", self.name);
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Runs cleanup code when the guard goes out of scope, unless [`cancel`]
/// was called first.
///
/// [`cancel`]: ScopeGuard::cancel
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self { cleanup: Some(cleanup) }
    }

    /// Cancels the cleanup; it will not run on drop.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Runs `$e` when the enclosing scope ends.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn scope_guard_runs_cleanup_on_drop() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn scope_guard_cancel_skips_cleanup() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }
}
