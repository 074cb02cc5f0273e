//! Block device abstraction (C5): a process-wide registry mapping a name to
//! a device's `read_blocks`/`write_blocks` implementation, consumed by the
//! VFS backends for all their I/O.

use alloc::{boxed::Box, collections::BTreeMap, string::String, sync::Arc};

use spin::Mutex;

use crate::error::KernelError;

/// Block device trait every backend (driver or `RamBlockDevice`) implements.
pub trait BlockDevice: Send + Sync {
    fn name(&self) -> &str;
    fn block_size(&self) -> usize;
    fn block_count(&self) -> u64;
    fn read_blocks(&self, start_block: u64, buffer: &mut [u8]) -> Result<(), KernelError>;
    fn write_blocks(&mut self, start_block: u64, buffer: &[u8]) -> Result<(), KernelError>;

    fn flush(&mut self) -> Result<(), KernelError> {
        Ok(())
    }
}

/// A registered device: `read`/`write` need `&mut self`, so the registry
/// hands out a shared, lock-guarded handle rather than a bare `Arc<dyn
/// BlockDevice>`.
pub type DeviceHandle = Arc<Mutex<Box<dyn BlockDevice>>>;

static REGISTRY: Mutex<BTreeMap<String, DeviceHandle>> = Mutex::new(BTreeMap::new());

/// Registers `device` under `name`. Fails if the name is already taken.
pub fn register(name: &str, device: Box<dyn BlockDevice>) -> Result<DeviceHandle, KernelError> {
    let mut registry = REGISTRY.lock();
    if registry.contains_key(name) {
        return Err(KernelError::InvalidArgument {
            name: "name",
            value: "block device already registered",
        });
    }
    let handle: DeviceHandle = Arc::new(Mutex::new(device));
    registry.insert(String::from(name), handle.clone());
    Ok(handle)
}

/// O(N) scan of the registry by name.
pub fn get_by_name(name: &str) -> Option<DeviceHandle> {
    REGISTRY.lock().get(name).cloned()
}

/// Reads exactly `buf.len() / block_size` blocks starting at `lba`.
pub fn blkread(device: &DeviceHandle, lba: u64, buf: &mut [u8]) -> Result<(), KernelError> {
    let dev = device.lock();
    let block_size = dev.block_size() as u64;
    let blocks_needed = buf.len() as u64 / block_size;
    if lba + blocks_needed > dev.block_count() {
        return Err(KernelError::InvalidArgument {
            name: "lba",
            value: "out of range",
        });
    }
    dev.read_blocks(lba, buf)
}

pub fn blkwrite(device: &DeviceHandle, lba: u64, buf: &[u8]) -> Result<(), KernelError> {
    let mut dev = device.lock();
    let block_size = dev.block_size() as u64;
    let blocks_needed = buf.len() as u64 / block_size;
    if lba + blocks_needed > dev.block_count() {
        return Err(KernelError::InvalidArgument {
            name: "lba",
            value: "out of range",
        });
    }
    dev.write_blocks(lba, buf)
}

/// RAM-backed block device, used for boot-time self-tests and the scenario
/// fixtures that need a disk without real hardware.
pub struct RamBlockDevice {
    name: String,
    block_size: usize,
    data: alloc::vec::Vec<u8>,
}

impl RamBlockDevice {
    pub fn new(name: String, block_size: usize, block_count: u64) -> Self {
        Self {
            name,
            block_size,
            data: alloc::vec![0u8; block_size * block_count as usize],
        }
    }
}

impl BlockDevice for RamBlockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        (self.data.len() / self.block_size) as u64
    }

    fn read_blocks(&self, start_block: u64, buffer: &mut [u8]) -> Result<(), KernelError> {
        let start = start_block as usize * self.block_size;
        let end = start + buffer.len();
        if end > self.data.len() {
            return Err(KernelError::InvalidArgument {
                name: "block_range",
                value: "out of bounds",
            });
        }
        buffer.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_blocks(&mut self, start_block: u64, buffer: &[u8]) -> Result<(), KernelError> {
        let start = start_block as usize * self.block_size;
        let end = start + buffer.len();
        if end > self.data.len() {
            return Err(KernelError::InvalidArgument {
                name: "block_range",
                value: "out of bounds",
            });
        }
        self.data[start..end].copy_from_slice(buffer);
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::string::String;

    use super::*;

    #[test]
    fn round_trips_a_block() {
        let handle = register("disk0", Box::new(RamBlockDevice::new(String::from("disk0"), 512, 8))).unwrap();
        let data = [0x42u8; 512];
        blkwrite(&handle, 0, &data).unwrap();
        let mut out = [0u8; 512];
        blkread(&handle, 0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        register("disk1", Box::new(RamBlockDevice::new(String::from("disk1"), 512, 1))).unwrap();
        let err = register("disk1", Box::new(RamBlockDevice::new(String::from("disk1"), 512, 1)));
        assert!(err.is_err());
    }

    #[test]
    fn out_of_range_lba_is_rejected() {
        let handle = register("disk2", Box::new(RamBlockDevice::new(String::from("disk2"), 512, 2))).unwrap();
        let mut buf = [0u8; 512];
        assert!(blkread(&handle, 5, &mut buf).is_err());
    }

    #[test]
    fn get_by_name_finds_registered_device() {
        register("disk3", Box::new(RamBlockDevice::new(String::from("disk3"), 512, 4))).unwrap();
        assert!(get_by_name("disk3").is_some());
        assert!(get_by_name("no-such-disk").is_none());
    }
}
