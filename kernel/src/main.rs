//! Freestanding kernel binary: wires the library's subsystems together in
//! the order `mm → fs → sched → process` and enters the scheduler loop.
//!
//! The firmware memory map and the very first few instructions after the
//! bootloader hands off are external collaborators; this binary treats them
//! as a single fixed-size region until a real loader-handoff struct exists.

#![no_std]
#![no_main]
#![cfg_attr(test, allow(unused))]

extern crate alloc;

use core::panic::PanicInfo;

use alloc::vec::Vec;
use leanix_kernel::{arch, fs, mm, mm::MemoryRegion, process, sched};

/// Placeholder firmware memory map: 16 MiB of usable RAM starting at 1 MiB,
/// enough to bring up the allocator and boot the init process. A real boot
/// path replaces this with whatever map the bootloader hands off.
static BOOT_MEMORY_MAP: [MemoryRegion; 1] = [MemoryRegion {
    base: 0x0010_0000,
    length: 16 * 1024 * 1024,
    usable: true,
}];

#[no_mangle]
pub extern "C" fn _start() -> ! {
    leanix_kernel::serial_println!(
        "leanix-kernel v{} (git {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("unknown")
    );

    mm::init(&BOOT_MEMORY_MAP);
    fs::init();
    sched::init();

    let init_image = build_init_image();
    match process::init(&init_image) {
        Ok(pid) => log::info!("init process started, pid={}", pid),
        Err(e) => panic!("failed to start init process: {}", e),
    }

    sched::run();
}

/// Builds a minimal ET_EXEC/EM_386 image for pid 1: a single `PT_LOAD`
/// segment that halts and spins. Stands in for a real init binary, which
/// would be embedded or loaded from the root filesystem once one exists.
fn build_init_image() -> Vec<u8> {
    const EHSIZE: usize = 52;
    const PHSIZE: usize = 32;
    let code: &[u8] = &[0xF4, 0xEB, 0xFD]; // hlt; jmp $
    let entry: u32 = 0x0804_8000;
    let file_off = (EHSIZE + PHSIZE) as u32;

    let mut image = alloc::vec![0u8; EHSIZE + PHSIZE + code.len()];

    image[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    image[4] = 1; // ELFCLASS32
    image[5] = 1; // little-endian
    image[16..18].copy_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    image[18..20].copy_from_slice(&3u16.to_le_bytes()); // e_machine = EM_386
    image[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
    image[24..28].copy_from_slice(&entry.to_le_bytes()); // e_entry
    image[28..32].copy_from_slice(&(EHSIZE as u32).to_le_bytes()); // e_phoff
    image[40..42].copy_from_slice(&(EHSIZE as u16).to_le_bytes()); // e_ehsize
    image[42..44].copy_from_slice(&(PHSIZE as u16).to_le_bytes()); // e_phentsize
    image[44..46].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

    let ph = EHSIZE;
    image[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
    image[ph + 4..ph + 8].copy_from_slice(&file_off.to_le_bytes()); // p_offset
    image[ph + 8..ph + 12].copy_from_slice(&entry.to_le_bytes()); // p_vaddr
    image[ph + 12..ph + 16].copy_from_slice(&entry.to_le_bytes()); // p_paddr
    image[ph + 16..ph + 20].copy_from_slice(&(code.len() as u32).to_le_bytes()); // p_filesz
    image[ph + 20..ph + 24].copy_from_slice(&(code.len() as u32).to_le_bytes()); // p_memsz
    image[ph + 24..ph + 28].copy_from_slice(&1u32.to_le_bytes()); // p_flags = PF_X

    image[EHSIZE + PHSIZE..].copy_from_slice(code);
    image
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    leanix_kernel::serial_println!("[KERNEL PANIC] {}", info);
    arch::halt()
}
