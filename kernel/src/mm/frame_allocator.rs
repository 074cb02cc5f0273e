//! Physical frame allocator (C1).
//!
//! A bitmap with one bit per 4 KiB frame of physical RAM, `1 = used`. Built
//! once at boot from the firmware memory map and never destroyed.

use spin::Mutex;

use super::{PhysAddr, FRAME_SIZE};

/// A single entry of the firmware-provided physical memory map (the
/// int 0x15, eax=0xE820 model: base, length, and a region type where
/// `1` means usable RAM).
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub usable: bool,
}

/// Bitmap-backed frame allocator.
pub struct FrameAllocator {
    bitmap: &'static mut [u8],
    total_frames: usize,
    used_frames: usize,
}

/// Error returned when no free frame exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfFrames;

impl FrameAllocator {
    /// Builds the bitmap for `total_frames` frames inside `bitmap`, which
    /// must be at least `ceil(total_frames / 8)` bytes. All frames start
    /// marked used; callers free usable ranges with [`mark_region`].
    ///
    /// [`mark_region`]: FrameAllocator::mark_region
    fn new(bitmap: &'static mut [u8], total_frames: usize) -> Self {
        bitmap.fill(0xFF);
        Self {
            bitmap,
            total_frames,
            used_frames: total_frames,
        }
    }

    fn bit(&self, frame: usize) -> bool {
        self.bitmap[frame / 8] & (1 << (frame % 8)) != 0
    }

    fn set_bit(&mut self, frame: usize, used: bool) {
        if used {
            self.bitmap[frame / 8] |= 1 << (frame % 8);
        } else {
            self.bitmap[frame / 8] &= !(1 << (frame % 8));
        }
    }

    /// Toggles a byte-range worth of frames; `base`/`base+size` are aligned
    /// to frame boundaries (`base` down, the end up).
    pub fn mark_region(&mut self, base: u64, size: u64, reserved: bool) {
        if size == 0 {
            return;
        }
        let start_frame = (base / FRAME_SIZE as u64) as usize;
        let end = base + size;
        let end_frame = end.div_ceil(FRAME_SIZE as u64) as usize;
        for frame in start_frame..end_frame.min(self.total_frames) {
            let was_used = self.bit(frame);
            self.set_bit(frame, reserved);
            match (was_used, reserved) {
                (false, true) => self.used_frames += 1,
                (true, false) => self.used_frames -= 1,
                _ => {}
            }
        }
        // Frame 0 is permanently reserved regardless of what the firmware map says.
        if !self.bit(0) {
            self.set_bit(0, true);
            self.used_frames += 1;
        }
    }

    /// Returns the lowest-addressed free frame, marking it used.
    pub fn alloc(&mut self) -> Result<PhysAddr, OutOfFrames> {
        for frame in 0..self.total_frames {
            if !self.bit(frame) {
                self.set_bit(frame, true);
                self.used_frames += 1;
                return Ok(PhysAddr::new(frame as u32 * FRAME_SIZE as u32));
            }
        }
        Err(OutOfFrames)
    }

    /// Marks `p`'s frame free. No-op for out-of-range, reserved, or
    /// already-free frames; double-free is not fatal.
    pub fn free(&mut self, p: PhysAddr) {
        let frame = (p.as_u32() / FRAME_SIZE as u32) as usize;
        if frame == 0 || frame >= self.total_frames {
            return;
        }
        if self.bit(frame) {
            self.set_bit(frame, false);
            self.used_frames -= 1;
        }
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn used_frames(&self) -> usize {
        self.used_frames
    }
}

static FRAME_ALLOCATOR: Mutex<Option<FrameAllocator>> = Mutex::new(None);

/// Initializes the global frame allocator from the firmware memory map.
/// `bitmap_storage` must outlive the kernel (it is itself marked used as
/// part of this call, as required by the design: the bitmap's own backing
/// frames are reserved).
pub fn init(map: &[MemoryRegion], bitmap_storage: &'static mut [u8]) {
    let highest = map.iter().map(|r| r.base + r.length).max().unwrap_or(0);
    let total_frames = (highest / FRAME_SIZE as u64) as usize;
    assert!(
        bitmap_storage.len() * 8 >= total_frames,
        "bitmap storage too small for {} frames",
        total_frames
    );

    let mut allocator = FrameAllocator::new(bitmap_storage, total_frames);
    for region in map {
        if region.usable {
            allocator.mark_region(region.base, region.length, false);
        }
    }

    let bitmap_base = allocator.bitmap.as_ptr() as u64;
    let bitmap_len = allocator.bitmap.len() as u64;
    allocator.mark_region(bitmap_base, bitmap_len, true);

    log::info!(
        "[C1] frame allocator: {} frames, {} used after bring-up",
        allocator.total_frames(),
        allocator.used_frames()
    );

    *FRAME_ALLOCATOR.lock() = Some(allocator);
}

/// Allocates one 4 KiB physical frame.
pub fn alloc_frame() -> Result<PhysAddr, OutOfFrames> {
    FRAME_ALLOCATOR
        .lock()
        .as_mut()
        .expect("frame allocator not initialized")
        .alloc()
}

/// Frees a 4 KiB physical frame previously returned by [`alloc_frame`].
pub fn free_frame(p: PhysAddr) {
    FRAME_ALLOCATOR
        .lock()
        .as_mut()
        .expect("frame allocator not initialized")
        .free(p);
}

/// Total frames tracked by the allocator.
pub fn total_frames() -> usize {
    FRAME_ALLOCATOR.lock().as_ref().map_or(0, |a| a.total_frames())
}

/// Frames currently marked used.
pub fn used_frames() -> usize {
    FRAME_ALLOCATOR.lock().as_ref().map_or(0, |a| a.used_frames())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn new_allocator(frames: usize) -> FrameAllocator {
        let storage = alloc::vec![0u8; frames.div_ceil(8)].leak();
        let mut a = FrameAllocator::new(storage, frames);
        a.mark_region(0, frames as u64 * FRAME_SIZE as u64, false);
        a
    }

    #[test]
    fn frame_0_is_reserved() {
        let mut a = new_allocator(64);
        assert!(a.bit(0));
        a.free(PhysAddr::new(0));
        assert!(a.bit(0));
    }

    #[test]
    fn alloc_returns_aligned_lowest_free() {
        let mut a = new_allocator(64);
        let p = a.alloc().unwrap();
        assert_eq!(p.as_u32() % FRAME_SIZE as u32, 0);
        assert_eq!(p.as_u32(), FRAME_SIZE as u32); // frame 0 is reserved
    }

    #[test]
    fn free_then_alloc_reuses_same_frame() {
        let mut a = new_allocator(64);
        let p = a.alloc().unwrap();
        let used_before = a.used_frames();
        a.free(p);
        assert_eq!(a.used_frames(), used_before - 1);
        let q = a.alloc().unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn used_frames_accounting_is_exact() {
        let mut a = new_allocator(64);
        let base_used = a.used_frames();
        let mut allocated = alloc::vec::Vec::new();
        for _ in 0..10 {
            allocated.push(a.alloc().unwrap());
        }
        assert_eq!(a.used_frames(), base_used + 10);
        for p in allocated {
            a.free(p);
        }
        assert_eq!(a.used_frames(), base_used);
    }

    #[test]
    fn double_free_is_not_fatal() {
        let mut a = new_allocator(64);
        let p = a.alloc().unwrap();
        a.free(p);
        let used = a.used_frames();
        a.free(p);
        assert_eq!(a.used_frames(), used);
    }

    #[test]
    fn out_of_memory_when_exhausted() {
        let mut a = new_allocator(4);
        // frame 0 reserved, 3 usable frames.
        for _ in 0..3 {
            a.alloc().unwrap();
        }
        assert_eq!(a.alloc(), Err(OutOfFrames));
    }
}
