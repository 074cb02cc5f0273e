//! Page directory switching. GDT/segment setup for ring 3 entry is an
//! external collaborator; this module owns only the `cr3` load.

/// Loads `phys` (a page directory's physical address) into `cr3`.
pub fn load_page_directory(phys: u32) {
    // SAFETY: `phys` is the physical address of a live page directory
    // frame built by `page_table::PageDirectory`; loading it into `cr3`
    // is valid in ring 0 and takes effect on the next memory access.
    unsafe {
        core::arch::asm!("mov cr3, {0}", in(reg) phys, options(nostack));
    }
}
