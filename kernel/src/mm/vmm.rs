//! Virtual memory manager (C2): per-address-space page directories, region
//! mapping, and the kernel/user split.
//!
//! The kernel address space is built once at boot and never destroyed;
//! every user address space shares its kernel-half mappings and owns its
//! own user-half mappings exclusively, per [`page_table::PageDirectory`].

use spin::Mutex;

use super::{
    frame_allocator,
    page_table::{PageDirectory, PageFlags},
    PhysAddr, VirtAddr, FRAME_SIZE, PHYSMAP_BASE,
};

/// One process's address space.
pub struct AddressSpace {
    directory: PageDirectory,
}

impl AddressSpace {
    fn from_directory(directory: PageDirectory) -> Self {
        Self { directory }
    }

    /// Maps `len` bytes starting at `virt` (frame-aligned) to freshly
    /// allocated physical frames.
    pub fn map_anonymous(&mut self, virt: VirtAddr, len: usize, flags: PageFlags) -> Result<(), frame_allocator::OutOfFrames> {
        debug_assert!(virt.is_aligned());
        let pages = len.div_ceil(FRAME_SIZE);
        for i in 0..pages {
            let page_virt = virt.add((i * FRAME_SIZE) as u32);
            let phys = frame_allocator::alloc_frame()?;
            if let Err(e) = self.directory.map(page_virt, phys, flags) {
                frame_allocator::free_frame(phys);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Maps `len` bytes starting at `virt` directly onto `phys` (used for
    /// device/physmap-style mappings rather than anonymous memory).
    pub fn map_fixed(&mut self, virt: VirtAddr, phys: PhysAddr, len: usize, flags: PageFlags) -> Result<(), frame_allocator::OutOfFrames> {
        debug_assert!(virt.is_aligned());
        let pages = len.div_ceil(FRAME_SIZE);
        for i in 0..pages {
            let offset = (i * FRAME_SIZE) as u32;
            self.directory.map(virt.add(offset), PhysAddr::new(phys.as_u32() + offset), flags)?;
        }
        Ok(())
    }

    /// Unmaps and frees `len` bytes starting at `virt`.
    pub fn unmap(&mut self, virt: VirtAddr, len: usize) {
        let pages = len.div_ceil(FRAME_SIZE);
        for i in 0..pages {
            if let Some(phys) = self.directory.unmap(virt.add((i * FRAME_SIZE) as u32)) {
                frame_allocator::free_frame(phys);
            }
        }
    }

    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        self.directory.translate(virt)
    }

    pub fn page_directory_phys(&self) -> PhysAddr {
        self.directory.phys()
    }

    /// Loads this address space's page directory into `cr3`, making it the
    /// one the MMU translates against.
    pub fn activate(&self) {
        crate::arch::vmm::load_page_directory(self.directory.phys().as_u32());
    }

    /// Clones this address space: shared kernel half, deep-copied user
    /// half. Used by fork.
    pub fn clone_address_space(&self) -> Result<AddressSpace, frame_allocator::OutOfFrames> {
        Ok(Self::from_directory(self.directory.deep_clone_user_half()?))
    }

    /// Tears down the user half and frees the page directory itself. The
    /// kernel address space is never destroyed.
    pub fn destroy(self) {
        self.directory.destroy();
    }
}

static KERNEL_SPACE: Mutex<Option<AddressSpace>> = Mutex::new(None);

/// Builds the kernel address space: identity-maps the physmap window onto
/// every frame the frame allocator knows about (mirroring each physical
/// frame at `phys + PHYSMAP_BASE`), so kernel code can dereference any
/// physical address returned by the frame allocator without a separate
/// mapping step.
pub fn init() {
    let mut directory = PageDirectory::new().expect("out of frames bringing up the kernel address space");

    let mapped_span = frame_allocator::total_frames() as u32 * FRAME_SIZE as u32;
    let mut offset = 0u32;
    while offset < mapped_span {
        let virt = VirtAddr::new(PHYSMAP_BASE.wrapping_add(offset));
        let phys = PhysAddr::new(offset);
        directory
            .map(virt, phys, PageFlags::WRITABLE)
            .expect("out of frames building the kernel physmap");
        offset = offset.saturating_add(FRAME_SIZE as u32);
    }

    let phys = directory.phys();
    crate::arch::vmm::load_page_directory(phys.as_u32());
    *KERNEL_SPACE.lock() = Some(AddressSpace::from_directory(directory));

    log::info!("[C2] kernel address space mapped, physmap window at {:#010x}", PHYSMAP_BASE);
}

/// Maps `len` bytes of fresh anonymous memory at `virt` into the kernel
/// address space. Used by the heap (C3) to back its arena.
pub fn map_kernel_region(virt: VirtAddr, len: usize, flags: PageFlags) -> Result<(), frame_allocator::OutOfFrames> {
    KERNEL_SPACE
        .lock()
        .as_mut()
        .expect("kernel address space not initialized")
        .map_anonymous(virt, len, flags)
}

/// Creates a fresh user address space sharing the kernel's mappings.
pub fn new_user_space() -> Result<AddressSpace, frame_allocator::OutOfFrames> {
    let kernel = KERNEL_SPACE.lock();
    let kernel_dir = &kernel.as_ref().expect("kernel address space not initialized").directory;
    let mut directory = PageDirectory::new()?;
    kernel_dir.share_kernel_half(&mut directory);
    Ok(AddressSpace::from_directory(directory))
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn physmap_base_is_frame_aligned() {
        assert!(VirtAddr::new(PHYSMAP_BASE).is_aligned());
    }
}
