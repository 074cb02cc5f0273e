//! ELF32 binary loader (C4 support): validates the header, maps each
//! `PT_LOAD` segment into a process's address space, and zeroes the BSS
//! tail of each segment whose file size is smaller than its memory size.

use alloc::vec::Vec;

use crate::{
    error::KernelError,
    mm::{
        page_table::PageFlags,
        vmm::AddressSpace,
        VirtAddr, FRAME_SIZE,
    },
};

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const CLASS_32: u8 = 1;
const DATA_LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
const PT_LOAD: u32 = 1;

const PF_X: u32 = 1 << 0;
const PF_W: u32 = 1 << 1;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf32Header {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf32ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

/// Where execution should resume, and the initial stack top, after a
/// successful load.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    pub entry: VirtAddr,
    pub stack_top: VirtAddr,
}

fn read_header(image: &[u8]) -> Result<Elf32Header, KernelError> {
    if image.len() < core::mem::size_of::<Elf32Header>() {
        return Err(KernelError::InvalidBinary { reason: "file shorter than ELF header" });
    }
    // SAFETY: `Elf32Header` is `repr(C)` and `image` was just checked to be
    // at least its size; all field values are validated below before use.
    let header = unsafe { *(image.as_ptr() as *const Elf32Header) };

    if header.e_ident[0..4] != ELF_MAGIC {
        return Err(KernelError::InvalidBinary { reason: "bad magic" });
    }
    if header.e_ident[4] != CLASS_32 {
        return Err(KernelError::InvalidBinary { reason: "not a 32-bit binary" });
    }
    if header.e_ident[5] != DATA_LSB {
        return Err(KernelError::InvalidBinary { reason: "not little-endian" });
    }
    if header.e_type != ET_EXEC {
        return Err(KernelError::InvalidBinary { reason: "not an executable (ET_EXEC)" });
    }
    if header.e_machine != EM_386 {
        return Err(KernelError::InvalidBinary { reason: "wrong machine type" });
    }
    Ok(header)
}

fn program_headers(image: &[u8], header: &Elf32Header) -> Result<Vec<Elf32ProgramHeader>, KernelError> {
    let entsize = header.e_phentsize as usize;
    let count = header.e_phnum as usize;
    let start = header.e_phoff as usize;
    let end = start
        .checked_add(entsize.checked_mul(count).ok_or(KernelError::InvalidBinary { reason: "program header table overflow" })?)
        .ok_or(KernelError::InvalidBinary { reason: "program header table overflow" })?;
    if end > image.len() {
        return Err(KernelError::InvalidBinary { reason: "program header table out of bounds" });
    }

    let mut headers = Vec::with_capacity(count);
    for i in 0..count {
        let offset = start + i * entsize;
        // SAFETY: `offset + size_of::<Elf32ProgramHeader>() <= end <= image.len()`.
        let ph = unsafe { *(image[offset..].as_ptr() as *const Elf32ProgramHeader) };
        headers.push(ph);
    }
    Ok(headers)
}

/// Validates `image` as a 32-bit x86 `ET_EXEC` ELF binary and maps each
/// `PT_LOAD` segment into `space`, zeroing the bytes beyond `p_filesz` up
/// to `p_memsz` (the BSS tail).
///
/// `space` must already be the active address space (loaded into `cr3`):
/// the segment copy writes through each `p_vaddr` directly rather than
/// through the physmap, since `exec` always replaces the calling
/// process's own image.
pub fn load(image: &[u8], space: &mut AddressSpace) -> Result<LoadedImage, KernelError> {
    let header = read_header(image)?;
    let phdrs = program_headers(image, &header)?;

    // Every successfully mapped segment's (page_base, span), unmapped and
    // freed if a later segment fails to load.
    let mut mapped: Vec<(VirtAddr, usize)> = Vec::new();
    let mut loaded_any = false;

    for ph in &phdrs {
        if ph.p_type != PT_LOAD {
            continue;
        }
        loaded_any = true;

        if let Err(e) = load_segment(image, ph, space, &mut mapped) {
            for (virt, span) in &mapped {
                space.unmap(*virt, *span);
            }
            return Err(e);
        }
    }

    if !loaded_any {
        return Err(KernelError::InvalidBinary { reason: "no PT_LOAD segments" });
    }

    Ok(LoadedImage {
        entry: VirtAddr::new(header.e_entry),
        stack_top: VirtAddr::new(super::process::USER_STACK_TOP),
    })
}

/// Maps and copies one `PT_LOAD` segment, recording `(page_base, span)` in
/// `mapped` once the mapping succeeds so the caller can roll it back if a
/// later segment fails.
fn load_segment(
    image: &[u8],
    ph: &Elf32ProgramHeader,
    space: &mut AddressSpace,
    mapped: &mut Vec<(VirtAddr, usize)>,
) -> Result<(), KernelError> {
    if ph.p_filesz > ph.p_memsz {
        return Err(KernelError::InvalidBinary { reason: "segment file size exceeds memory size" });
    }
    let seg_start = ph.p_offset as usize;
    let seg_end = seg_start
        .checked_add(ph.p_filesz as usize)
        .ok_or(KernelError::InvalidBinary { reason: "segment out of bounds" })?;
    if seg_end > image.len() {
        return Err(KernelError::InvalidBinary { reason: "segment data out of bounds" });
    }

    let page_base = ph.p_vaddr & !(FRAME_SIZE as u32 - 1);
    let span = (ph.p_vaddr - page_base) + ph.p_memsz;
    let mut flags = PageFlags::USER;
    if ph.p_flags & PF_W != 0 {
        flags |= PageFlags::WRITABLE;
    }
    let _ = ph.p_flags & PF_X; // execute permission: no NX bit in this design.

    space
        .map_anonymous(VirtAddr::new(page_base), span as usize, flags)
        .map_err(|_| KernelError::OutOfMemory { requested: span as usize, available: 0 })?;
    mapped.push((VirtAddr::new(page_base), span as usize));

    // SAFETY: the destination was just mapped writable for exactly
    // `span` bytes starting at `page_base`; `ph.p_vaddr - page_base`
    // keeps the write inside that mapping.
    unsafe {
        let dst = (ph.p_vaddr as *mut u8).add(0);
        let src = &image[seg_start..seg_end];
        core::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        if ph.p_memsz > ph.p_filesz {
            let bss_start = dst.add(ph.p_filesz as usize);
            core::ptr::write_bytes(bss_start, 0, (ph.p_memsz - ph.p_filesz) as usize);
        }
    }
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn minimal_header(e_type: u16, machine: u16, class: u8) -> Vec<u8> {
        let mut bytes = alloc::vec![0u8; core::mem::size_of::<Elf32Header>()];
        bytes[0..4].copy_from_slice(&ELF_MAGIC);
        bytes[4] = class;
        bytes[5] = DATA_LSB;
        let header = Elf32Header {
            e_ident: bytes[0..16].try_into().unwrap(),
            e_type,
            e_machine: machine,
            e_version: 1,
            e_entry: 0x1000,
            e_phoff: core::mem::size_of::<Elf32Header>() as u32,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: core::mem::size_of::<Elf32Header>() as u16,
            e_phentsize: core::mem::size_of::<Elf32ProgramHeader>() as u16,
            e_phnum: 0,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        };
        // SAFETY: writing a repr(C) struct into a same-sized byte buffer.
        unsafe {
            core::ptr::write(bytes.as_mut_ptr() as *mut Elf32Header, header);
        }
        bytes
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = minimal_header(ET_EXEC, EM_386, CLASS_32);
        image[0] = 0;
        assert!(read_header(&image).is_err());
    }

    #[test]
    fn rejects_64_bit_class() {
        let image = minimal_header(ET_EXEC, EM_386, 2);
        assert!(read_header(&image).is_err());
    }

    #[test]
    fn rejects_non_executable_type() {
        let image = minimal_header(1 /* ET_REL */, EM_386, CLASS_32);
        assert!(read_header(&image).is_err());
    }

    #[test]
    fn rejects_wrong_machine() {
        let image = minimal_header(ET_EXEC, 62 /* x86_64 */, CLASS_32);
        assert!(read_header(&image).is_err());
    }

    #[test]
    fn accepts_well_formed_header() {
        let image = minimal_header(ET_EXEC, EM_386, CLASS_32);
        assert!(read_header(&image).is_ok());
    }
}
