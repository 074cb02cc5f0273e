//! Bare-metal process lifecycle tests: create/fork/wait against a tiny
//! one-segment ELF image, run with a live memory and scheduler subsystem
//! rather than a host mock.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(leanix_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::vec::Vec;
use core::panic::PanicInfo;

use leanix_kernel::{
    error::KernelError,
    mm::{self, MemoryRegion},
    process::{self, ProcessId},
    sched, test_panic_handler,
};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Process");

    let map = [MemoryRegion { base: 0, length: 16 * 1024 * 1024, usable: true }];
    mm::init(&map);
    sched::init();

    test_main();
    leanix_kernel::arch::halt()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

/// Builds a tiny ET_EXEC/EM_386 image: one `PT_LOAD` segment containing a
/// single `hlt; jmp $` loop, entry point at its start.
fn build_minimal_elf() -> Vec<u8> {
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

#[test_case]
fn create_process_succeeds_with_one_load_segment() -> Result<(), KernelError> {
    let image = build_minimal_elf();
    let pid = process::create_process("elf_test", &image, None)?;
    assert!(pid > 0);
    Ok(())
}

#[test_case]
fn fork_process_assigns_a_child_and_records_parent() -> Result<(), KernelError> {
    let image = build_minimal_elf();
    let parent = process::create_process("fork_parent", &image, None)?;
    let parent_tid = sched::current_tid().expect("current_tid");

    let child = process::fork_process(parent, parent_tid)?;
    assert_ne!(child, parent);
    Ok(())
}

#[test_case]
fn wait_process_without_children_is_not_found() -> Result<(), KernelError> {
    let waiter_tid = sched::current_tid().expect("current_tid");
    let lonely: ProcessId = 0xFFFF_FFF0;
    assert!(process::wait_process(lonely, waiter_tid, None).is_err());
    Ok(())
}
