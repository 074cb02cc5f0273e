//! Kernel heap (C3): a buddy allocator over a fixed arena mapped by the
//! virtual memory manager, installed as the global allocator.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::NonNull,
};

use spin::Mutex;

use super::{page_table::PageFlags, vmm, VirtAddr};

/// Smallest block the allocator ever hands out.
const MIN_BLOCK_SIZE: usize = 32;
/// Number of buddy orders; order `k` holds blocks of
/// `MIN_BLOCK_SIZE << k` bytes. `ORDERS - 1` spans the whole arena.
const ORDERS: usize = 20;
/// Total arena size: `32 * 2^19 = 16 MiB`.
pub const HEAP_SIZE: usize = MIN_BLOCK_SIZE << (ORDERS - 1);

/// Virtual address the heap arena is mapped at. Chosen above the physmap
/// window with enough headroom for machines with up to 256 MiB of RAM
/// (`PHYSMAP_BASE + 256 MiB`); see the memory map note in the design
/// ledger.
pub const HEAP_START: VirtAddr = VirtAddr::new(super::PHYSMAP_BASE + 0x1000_0000);

struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// Buddy allocator state: one intrusive free list per order.
struct BuddyAllocator {
    base: usize,
    free_lists: [Option<NonNull<FreeBlock>>; ORDERS],
    allocated_bytes: usize,
}

// SAFETY: all access is through the enclosing `Mutex`.
unsafe impl Send for BuddyAllocator {}

fn block_size(order: usize) -> usize {
    MIN_BLOCK_SIZE << order
}

fn order_for(size: usize) -> usize {
    let size = size.max(MIN_BLOCK_SIZE).next_power_of_two();
    (size / MIN_BLOCK_SIZE).trailing_zeros() as usize
}

impl BuddyAllocator {
    fn new(base: usize) -> Self {
        let mut a = Self {
            base,
            free_lists: [None; ORDERS],
            allocated_bytes: 0,
        };
        a.push_free(base, ORDERS - 1);
        a
    }

    fn push_free(&mut self, addr: usize, order: usize) {
        let block = addr as *mut FreeBlock;
        // SAFETY: `addr` is inside the arena and not in use by any live
        // allocation; writing the free-list link through it is sound.
        unsafe {
            block.write(FreeBlock { next: self.free_lists[order] });
        }
        self.free_lists[order] = NonNull::new(block);
    }

    fn pop_free(&mut self, order: usize) -> Option<usize> {
        let head = self.free_lists[order]?;
        // SAFETY: `head` was pushed by `push_free` and has not been reused.
        self.free_lists[order] = unsafe { head.as_ref().next };
        Some(head.as_ptr() as usize)
    }

    fn remove_free(&mut self, addr: usize, order: usize) -> bool {
        let target = addr as *const FreeBlock;
        let mut cursor = &mut self.free_lists[order];
        loop {
            match cursor {
                None => return false,
                Some(node) if node.as_ptr() as *const FreeBlock == target => {
                    // SAFETY: `node` was pushed by `push_free`.
                    *cursor = unsafe { node.as_ref().next };
                    return true;
                }
                Some(node) => {
                    // SAFETY: `node` was pushed by `push_free`.
                    cursor = unsafe { &mut (*node.as_ptr()).next };
                }
            }
        }
    }

    fn alloc(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let order = order_for(layout.size().max(layout.align()));
        if order >= ORDERS {
            return None;
        }

        // Find the smallest free block at `order` or above, splitting
        // every level down to `order` as we go.
        let mut found_order = None;
        for candidate in order..ORDERS {
            if self.free_lists[candidate].is_some() {
                found_order = Some(candidate);
                break;
            }
        }
        let mut current_order = found_order?;
        let mut addr = self.pop_free(current_order)?;

        while current_order > order {
            current_order -= 1;
            let buddy = addr + block_size(current_order);
            self.push_free(buddy, current_order);
        }

        self.allocated_bytes += block_size(order);
        NonNull::new(addr as *mut u8)
    }

    fn dealloc(&mut self, ptr: NonNull<u8>, layout: Layout) {
        let order = order_for(layout.size().max(layout.align()));
        self.allocated_bytes -= block_size(order);

        let mut addr = ptr.as_ptr() as usize;
        let mut order = order;
        while order < ORDERS - 1 {
            let buddy = self.base + ((addr - self.base) ^ block_size(order));
            if self.remove_free(buddy, order) {
                addr = addr.min(buddy);
                order += 1;
            } else {
                break;
            }
        }
        self.push_free(addr, order);
    }
}

/// `GlobalAlloc` wrapper around [`BuddyAllocator`], installed as the
/// kernel's `#[global_allocator]` once [`init`] has mapped the arena.
pub struct LockedHeap(Mutex<Option<BuddyAllocator>>);

impl LockedHeap {
    pub const fn empty() -> Self {
        Self(Mutex::new(None))
    }

    /// Statistics for the `kheap_stats` debug helper: total arena bytes and
    /// bytes currently handed out.
    pub fn stats(&self) -> (usize, usize) {
        let guard = self.0.lock();
        let used = guard.as_ref().map_or(0, |a| a.allocated_bytes);
        (HEAP_SIZE, used)
    }
}

// SAFETY: every operation goes through the inner `Mutex`, and the returned
// pointers come from the arena mapped by `init`, which is live for the
// rest of the kernel's execution.
unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.0
            .lock()
            .as_mut()
            .expect("kernel heap not initialized")
            .alloc(layout)
            .map_or(core::ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            self.0
                .lock()
                .as_mut()
                .expect("kernel heap not initialized")
                .dealloc(ptr, layout);
        }
    }
}

/// Maps the heap arena and hands it to the global allocator. Must run
/// after [`vmm::init`], and before any `alloc`-crate type is constructed.
#[cfg(target_os = "none")]
pub fn init() {
    vmm::map_kernel_region(HEAP_START, HEAP_SIZE, PageFlags::WRITABLE)
        .expect("out of frames mapping the kernel heap arena");

    *crate::ALLOCATOR.0.lock() = Some(BuddyAllocator::new(HEAP_START.as_u32() as usize));

    log::info!("[C3] kernel heap ready: {} bytes at {:#010x}", HEAP_SIZE, HEAP_START.as_u32());
}

/// On host test builds the system allocator backs `alloc`, so there is no
/// arena to map; the heap subsystem is still exercised directly by the
/// unit tests below.
#[cfg(not(target_os = "none"))]
pub fn init() {}

/// Returns `(capacity, used)` in bytes, for the `kheap_stats` debug helper.
#[cfg(target_os = "none")]
pub fn kheap_stats() -> (usize, usize) {
    crate::ALLOCATOR.stats()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn new_test_allocator() -> (BuddyAllocator, alloc::vec::Vec<u8>) {
        let arena_bytes = HEAP_SIZE;
        let mut storage = alloc::vec![0u8; arena_bytes + MIN_BLOCK_SIZE];
        let base = storage.as_mut_ptr() as usize;
        let aligned_base = (base + MIN_BLOCK_SIZE - 1) & !(MIN_BLOCK_SIZE - 1);
        (BuddyAllocator::new(aligned_base), storage)
    }

    #[test]
    fn alloc_dealloc_round_trips() {
        let (mut a, _storage) = new_test_allocator();
        let layout = Layout::from_size_align(64, 8).unwrap();
        let ptr = a.alloc(layout).unwrap();
        assert_eq!(a.allocated_bytes, block_size(order_for(64)));
        a.dealloc(ptr, layout);
        assert_eq!(a.allocated_bytes, 0);
    }

    #[test]
    fn buddies_merge_back_into_the_original_block() {
        let (mut a, _storage) = new_test_allocator();
        let layout = Layout::from_size_align(MIN_BLOCK_SIZE, MIN_BLOCK_SIZE).unwrap();
        let p1 = a.alloc(layout).unwrap();
        let p2 = a.alloc(layout).unwrap();
        a.dealloc(p1, layout);
        a.dealloc(p2, layout);
        // Everything should have coalesced back up to a single top-order block.
        assert!(a.free_lists[ORDERS - 1].is_some());
        for order in 0..ORDERS - 1 {
            assert!(a.free_lists[order].is_none());
        }
    }

    #[test]
    fn order_for_rounds_up_to_power_of_two() {
        assert_eq!(order_for(1), 0);
        assert_eq!(order_for(MIN_BLOCK_SIZE), 0);
        assert_eq!(order_for(MIN_BLOCK_SIZE + 1), 1);
        assert_eq!(order_for(HEAP_SIZE), ORDERS - 1);
    }

    #[test]
    fn exhausting_the_arena_returns_none() {
        let (mut a, _storage) = new_test_allocator();
        let layout = Layout::from_size_align(HEAP_SIZE, 8).unwrap();
        let p = a.alloc(layout).unwrap();
        assert!(a.alloc(Layout::from_size_align(MIN_BLOCK_SIZE, 8).unwrap()).is_none());
        a.dealloc(p, layout);
    }
}
