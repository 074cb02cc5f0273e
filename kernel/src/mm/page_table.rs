//! Two-level 32-bit page tables: a page directory of 1024 entries, each
//! optionally pointing at a page table of 1024 entries, each mapping one
//! 4 KiB page.

use bitflags::bitflags;

use super::{frame_allocator, PhysAddr, VirtAddr, FRAME_SIZE};

/// Entries per page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

bitflags! {
    /// Flags carried in the low 12 bits of a page directory / page table
    /// entry, matching the x86 hardware layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT    = 1 << 0;
        const WRITABLE   = 1 << 1;
        const USER       = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE   = 1 << 4;
        const ACCESSED   = 1 << 5;
        const DIRTY      = 1 << 6;
    }
}

const ADDR_MASK: u32 = 0xFFFF_F000;

/// One entry of a page directory or page table.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct Entry(u32);

impl Entry {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    pub fn addr(self) -> Option<PhysAddr> {
        self.is_present().then(|| PhysAddr::new(self.0 & ADDR_MASK))
    }

    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & 0xFFF)
    }

    pub fn set(&mut self, addr: PhysAddr, flags: PageFlags) {
        debug_assert_eq!(addr.as_u32() & !ADDR_MASK, 0, "unaligned page table entry address");
        self.0 = (addr.as_u32() & ADDR_MASK) | (flags | PageFlags::PRESENT).bits();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// A page table or page directory: 1024 4-byte entries filling one 4 KiB
/// frame, matching the hardware layout exactly.
#[repr(align(4096))]
pub struct Table {
    entries: [Entry; ENTRIES_PER_TABLE],
}

impl Table {
    pub fn zero(&mut self) {
        for e in self.entries.iter_mut() {
            e.clear();
        }
    }

    pub fn entry(&self, index: usize) -> Entry {
        self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut Entry {
        &mut self.entries[index]
    }
}

/// A page directory, the root of one address space's translation.
pub struct PageDirectory {
    phys: PhysAddr,
}

impl PageDirectory {
    /// Allocates a fresh, zeroed page directory frame.
    ///
    /// Relies on the boot-time page tables (an external collaborator)
    /// identity-mapping low physical memory 1:1 until [`vmm::init`] builds
    /// the physmap window; the frame allocator's lowest-address-first
    /// policy keeps early allocations, including this one, inside that
    /// range.
    ///
    /// [`vmm::init`]: super::vmm::init
    pub fn new() -> Result<Self, frame_allocator::OutOfFrames> {
        let phys = frame_allocator::alloc_frame()?;
        let table = unsafe { &mut *(phys.to_virt().as_u32() as *mut Table) };
        table.zero();
        Ok(Self { phys })
    }

    /// Wraps an already-built page directory, e.g. the currently-loaded one.
    ///
    /// # Safety
    /// `phys` must point at a valid, live page directory frame.
    pub unsafe fn from_phys(phys: PhysAddr) -> Self {
        Self { phys }
    }

    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    fn table(&self) -> &Table {
        unsafe { &*(self.phys.to_virt().as_u32() as *const Table) }
    }

    fn table_mut(&mut self) -> &mut Table {
        unsafe { &mut *(self.phys.to_virt().as_u32() as *mut Table) }
    }

    /// Returns the page table backing `pd_index`, allocating one if absent.
    fn page_table_mut(&mut self, pd_index: usize, user: bool) -> Result<&mut Table, frame_allocator::OutOfFrames> {
        let entry = self.table().entry(pd_index);
        let phys = if let Some(phys) = entry.addr() {
            phys
        } else {
            let phys = frame_allocator::alloc_frame()?;
            let table = unsafe { &mut *(phys.to_virt().as_u32() as *mut Table) };
            table.zero();
            let mut flags = PageFlags::WRITABLE;
            if user {
                flags |= PageFlags::USER;
            }
            self.table_mut().entry_mut(pd_index).set(phys, flags);
            phys
        };
        Ok(unsafe { &mut *(phys.to_virt().as_u32() as *mut Table) })
    }

    /// Maps `virt` (must be frame-aligned) to `phys` with `flags`.
    pub fn map(&mut self, virt: VirtAddr, phys: PhysAddr, flags: PageFlags) -> Result<(), frame_allocator::OutOfFrames> {
        debug_assert!(virt.is_aligned());
        let user = flags.contains(PageFlags::USER);
        let pt = self.page_table_mut(virt.pd_index(), user)?;
        pt.entry_mut(virt.pt_index()).set(phys, flags);
        crate::arch::tlb::flush_address(virt.as_u32());
        Ok(())
    }

    /// Removes the mapping for `virt`, if any, and returns the physical
    /// frame it pointed to. If clearing this entry leaves the backing page
    /// table with no present entries, frees the page table's frame too and
    /// clears its directory entry.
    pub fn unmap(&mut self, virt: VirtAddr) -> Option<PhysAddr> {
        let pd_index = virt.pd_index();
        let pd_entry = self.table().entry(pd_index);
        let pt_phys = pd_entry.addr()?;
        let pt = unsafe { &mut *(pt_phys.to_virt().as_u32() as *mut Table) };
        let entry = pt.entry(virt.pt_index());
        let phys = entry.addr();
        pt.entry_mut(virt.pt_index()).clear();
        crate::arch::tlb::flush_address(virt.as_u32());

        if (0..ENTRIES_PER_TABLE).all(|i| !pt.entry(i).is_present()) {
            frame_allocator::free_frame(pt_phys);
            self.table_mut().entry_mut(pd_index).clear();
        }

        phys
    }

    /// Looks up the physical address `virt` currently maps to.
    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let pd_entry = self.table().entry(virt.pd_index());
        let pt_phys = pd_entry.addr()?;
        let pt = unsafe { &*(pt_phys.to_virt().as_u32() as *const Table) };
        let entry = pt.entry(virt.pt_index());
        entry.addr().map(|base| PhysAddr::new(base.as_u32() | virt.page_offset()))
    }

    /// Copies kernel-half page directory entries (indices covering
    /// [`super::PHYSMAP_BASE`] and above) from `self` into `other`, so
    /// every address space shares the same kernel mappings.
    pub fn share_kernel_half(&self, other: &mut PageDirectory) {
        let kernel_start_index = VirtAddr::new(super::PHYSMAP_BASE).pd_index();
        for i in kernel_start_index..ENTRIES_PER_TABLE {
            let entry = self.table().entry(i);
            *other.table_mut().entry_mut(i) = entry;
        }
    }

    /// Deep-copies every user-half mapping into a freshly allocated
    /// physical frame (used by fork to give the child process its own
    /// writable copy of the parent's pages). Kernel-half entries are
    /// shared, not copied, via [`share_kernel_half`].
    ///
    /// [`share_kernel_half`]: PageDirectory::share_kernel_half
    pub fn deep_clone_user_half(&self) -> Result<PageDirectory, frame_allocator::OutOfFrames> {
        let mut clone = PageDirectory::new()?;
        self.share_kernel_half(&mut clone);

        let kernel_start_index = VirtAddr::new(super::PHYSMAP_BASE).pd_index();
        for pd_index in 0..kernel_start_index {
            let pd_entry = self.table().entry(pd_index);
            let Some(pt_phys) = pd_entry.addr() else { continue };
            let pt = unsafe { &*(pt_phys.to_virt().as_u32() as *const Table) };
            for pt_index in 0..ENTRIES_PER_TABLE {
                let pt_entry = pt.entry(pt_index);
                let Some(src_phys) = pt_entry.addr() else { continue };

                let dst_phys = frame_allocator::alloc_frame()?;
                let src = unsafe { core::slice::from_raw_parts(src_phys.to_virt().as_u32() as *const u8, FRAME_SIZE) };
                let dst = unsafe { core::slice::from_raw_parts_mut(dst_phys.to_virt().as_u32() as *mut u8, FRAME_SIZE) };
                dst.copy_from_slice(src);

                let virt = VirtAddr::new(((pd_index as u32) << 22) | ((pt_index as u32) << 12));
                clone.map(virt, dst_phys, pt_entry.flags())?;
            }
        }
        Ok(clone)
    }

    /// Frees every physical frame this address space's user-half mappings
    /// own, plus the page tables and the directory itself. Does not touch
    /// the kernel half, which is shared, not owned.
    pub fn destroy(mut self) {
        let kernel_start_index = VirtAddr::new(super::PHYSMAP_BASE).pd_index();
        for pd_index in 0..kernel_start_index {
            let pd_entry = self.table().entry(pd_index);
            let Some(pt_phys) = pd_entry.addr() else { continue };
            let pt = unsafe { &*(pt_phys.to_virt().as_u32() as *const Table) };
            for pt_index in 0..ENTRIES_PER_TABLE {
                if let Some(frame) = pt.entry(pt_index).addr() {
                    frame_allocator::free_frame(frame);
                }
            }
            frame_allocator::free_frame(pt_phys);
            self.table_mut().entry_mut(pd_index).clear();
        }
        frame_allocator::free_frame(self.phys);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips_addr_and_flags() {
        let mut e = Entry::empty();
        assert!(!e.is_present());
        e.set(PhysAddr::new(0x1000), PageFlags::WRITABLE);
        assert!(e.is_present());
        assert_eq!(e.addr(), Some(PhysAddr::new(0x1000)));
        assert!(e.flags().contains(PageFlags::WRITABLE));
    }

    #[test]
    fn virt_addr_index_decomposition() {
        let v = VirtAddr::new(0xC010_2003);
        assert_eq!(v.pd_index(), 0x300);
        assert_eq!(v.pt_index(), 0x102);
        assert_eq!(v.page_offset(), 0x003);
    }
}
