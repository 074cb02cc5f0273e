//! Bare-metal filesystem tests: block device registry, VFS mount table,
//! and the HFS and FAT12 backends, run against real RAM-backed devices.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(leanix_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::{boxed::Box, string::String};
use core::panic::PanicInfo;

use leanix_kernel::{
    error::KernelError,
    fs::{self, blockdev, hfs, FsType},
    test_panic_handler,
};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Filesystem");
    fs::init();

    test_main();
    leanix_kernel::arch::halt()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

#[test_case]
fn register_and_read_write_a_ram_device() -> Result<(), KernelError> {
    let device = blockdev::register("disk0", Box::new(blockdev::RamBlockDevice::new(String::from("disk0"), 512, 64)))?;
    let mut out = [0xAAu8; 512];
    blockdev::blkwrite(&device, 3, &out)?;
    out.fill(0);
    blockdev::blkread(&device, 3, &mut out)?;
    assert!(out.iter().all(|&b| b == 0xAA));
    Ok(())
}

#[test_case]
fn hfs_format_mount_and_round_trip_a_file() -> Result<(), KernelError> {
    let device = blockdev::register("disk1", Box::new(blockdev::RamBlockDevice::new(String::from("disk1"), 512, 512)))?;
    hfs::format(&device, 64)?;
    fs::mount("/data", FsType::Hfs, device)?;

    let mut f = fs::create("/data/boot.cfg")?;
    fs::write(&mut f, b"root=/dev/disk1")?;
    fs::close(f);

    let mut f = fs::open("/data/boot.cfg")?;
    let mut buf = [0u8; 64];
    let n = fs::read(&mut f, &mut buf)?;
    assert_eq!(&buf[..n], b"root=/dev/disk1");

    let entries = fs::fs_list("/data")?;
    assert!(entries.iter().any(|e| e.name == "boot.cfg"));
    Ok(())
}

#[test_case]
fn hfs_mkdir_then_remove_rejects_non_empty_directory() -> Result<(), KernelError> {
    let device = blockdev::register("disk2", Box::new(blockdev::RamBlockDevice::new(String::from("disk2"), 512, 512)))?;
    hfs::format(&device, 64)?;
    fs::mount("/var", FsType::Hfs, device)?;

    fs::mkdir("/var/log")?;
    let mut f = fs::create("/var/log/kernel.log")?;
    fs::write(&mut f, b"boot ok")?;
    fs::close(f);

    assert!(fs::remove("/var/log").is_err(), "removing a non-empty directory must fail");

    fs::remove("/var/log/kernel.log")?;
    fs::remove("/var/log")?;
    Ok(())
}

#[test_case]
fn unmount_then_lookup_fails() -> Result<(), KernelError> {
    let device = blockdev::register("disk3", Box::new(blockdev::RamBlockDevice::new(String::from("disk3"), 512, 128)))?;
    hfs::format(&device, 32)?;
    fs::mount("/scratch", FsType::Hfs, device)?;
    fs::unmount("scratch")?;
    assert!(fs::open("/scratch/anything").is_err());
    Ok(())
}
