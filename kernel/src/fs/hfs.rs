//! HFS backend (C6): a writable, inode-based filesystem with a bitmap
//! allocator for inodes and data blocks, and direct plus single-indirect
//! block pointers.

use alloc::{string::String, sync::Arc, vec, vec::Vec};

use spin::Mutex;

use crate::{
    error::{FsError, KernelError},
    fs::{
        blockdev::{self, DeviceHandle},
        vfs::{DirEntry, Filesystem, Metadata, NodeType, VfsNode},
    },
};

pub const BLOCK_SIZE: usize = 512;
pub const MAGIC: u32 = 0x4846_5331; // "HFS1"
const DIRECT_PTRS: usize = 13;
const INODE_SIZE: usize = 4 + 4 + DIRECT_PTRS * 4 + 4;
const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
const DIR_ENTRY_SIZE: usize = 32;
const NAME_MAX: usize = 28;
const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;
const PTRS_PER_INDIRECT_BLOCK: usize = BLOCK_SIZE / 2; // 16-bit pointers
const ROOT_INODE: u32 = 1;

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[derive(Clone, Copy)]
struct Superblock {
    total_blocks: u32,
    total_inodes: u32,
    inode_bitmap_start: u32,
    block_bitmap_start: u32,
    inode_table_start: u32,
    data_start: u32,
}

impl Superblock {
    fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        write_u32(&mut buf, 0, self.total_blocks);
        write_u32(&mut buf, 4, self.total_inodes);
        write_u32(&mut buf, 8, self.inode_bitmap_start);
        write_u32(&mut buf, 12, self.block_bitmap_start);
        write_u32(&mut buf, 16, self.inode_table_start);
        write_u32(&mut buf, 20, self.data_start);
        write_u32(&mut buf, 24, MAGIC);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, KernelError> {
        if read_u32(buf, 24) != MAGIC {
            return Err(KernelError::FsError(FsError::BadMagic));
        }
        Ok(Self {
            total_blocks: read_u32(buf, 0),
            total_inodes: read_u32(buf, 4),
            inode_bitmap_start: read_u32(buf, 8),
            block_bitmap_start: read_u32(buf, 12),
            inode_table_start: read_u32(buf, 16),
            data_start: read_u32(buf, 20),
        })
    }

    fn inode_bitmap_blocks(&self) -> u32 {
        (self.total_inodes as u64).div_ceil(8 * BLOCK_SIZE as u64) as u32
    }

    fn block_bitmap_blocks(&self) -> u32 {
        (self.total_blocks as u64).div_ceil(8 * BLOCK_SIZE as u64) as u32
    }

    fn inode_table_blocks(&self) -> u32 {
        (self.total_inodes as u64).div_ceil(INODES_PER_BLOCK as u64) as u32
    }
}

#[derive(Clone, Copy)]
struct Inode {
    size: u32,
    is_directory: bool,
    direct: [u32; DIRECT_PTRS],
    single_indirect: u32,
}

impl Inode {
    fn empty(is_directory: bool) -> Self {
        Self { size: 0, is_directory, direct: [0; DIRECT_PTRS], single_indirect: 0 }
    }

    fn encode(&self, buf: &mut [u8]) {
        write_u32(buf, 0, self.size);
        write_u32(buf, 4, self.is_directory as u32);
        for (i, ptr) in self.direct.iter().enumerate() {
            write_u32(buf, 8 + i * 4, *ptr);
        }
        write_u32(buf, 8 + DIRECT_PTRS * 4, self.single_indirect);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut direct = [0u32; DIRECT_PTRS];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = read_u32(buf, 8 + i * 4);
        }
        Self {
            size: read_u32(buf, 0),
            is_directory: read_u32(buf, 4) != 0,
            direct,
            single_indirect: read_u32(buf, 8 + DIRECT_PTRS * 4),
        }
    }
}

/// Shared mutable filesystem state; every vnode holds an `Arc` back to this.
struct Inner {
    device: DeviceHandle,
    sb: Superblock,
    inode_bitmap: Mutex<Vec<u8>>,
    block_bitmap: Mutex<Vec<u8>>,
}

fn bit_test(bitmap: &[u8], idx: u32) -> bool {
    bitmap[idx as usize / 8] & (1 << (idx % 8)) != 0
}

fn bit_set(bitmap: &mut [u8], idx: u32, value: bool) {
    let byte = &mut bitmap[idx as usize / 8];
    if value {
        *byte |= 1 << (idx % 8);
    } else {
        *byte &= !(1 << (idx % 8));
    }
}

fn alloc_bit(bitmap: &mut [u8], limit: u32, reserved_below: u32) -> Option<u32> {
    for idx in reserved_below..limit {
        if !bit_test(bitmap, idx) {
            bit_set(bitmap, idx, true);
            return Some(idx);
        }
    }
    None
}

impl Inner {
    fn read_block(&self, lba: u32, buf: &mut [u8]) -> Result<(), KernelError> {
        blockdev::blkread(&self.device, lba as u64, buf)
    }

    fn write_block(&self, lba: u32, buf: &[u8]) -> Result<(), KernelError> {
        blockdev::blkwrite(&self.device, lba as u64, buf)
    }

    fn read_inode(&self, n: u32) -> Result<Inode, KernelError> {
        let block = self.sb.inode_table_start + n / INODES_PER_BLOCK as u32;
        let slot = (n % INODES_PER_BLOCK as u32) as usize;
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.read_block(block, &mut buf)?;
        Ok(Inode::decode(&buf[slot * INODE_SIZE..(slot + 1) * INODE_SIZE]))
    }

    fn write_inode(&self, n: u32, inode: &Inode) -> Result<(), KernelError> {
        let block = self.sb.inode_table_start + n / INODES_PER_BLOCK as u32;
        let slot = (n % INODES_PER_BLOCK as u32) as usize;
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.read_block(block, &mut buf)?;
        inode.encode(&mut buf[slot * INODE_SIZE..(slot + 1) * INODE_SIZE]);
        self.write_block(block, &buf)
    }

    fn alloc_inode(&self) -> Result<u32, KernelError> {
        let mut bitmap = self.inode_bitmap.lock();
        let n = alloc_bit(&mut bitmap, self.sb.total_inodes, 1).ok_or(KernelError::OutOfMemory { requested: 1, available: 0 })?;
        self.write_block(self.sb.inode_bitmap_start, &bitmap)?;
        Ok(n)
    }

    fn free_inode(&self, n: u32) -> Result<(), KernelError> {
        let mut bitmap = self.inode_bitmap.lock();
        bit_set(&mut bitmap, n, false);
        self.write_block(self.sb.inode_bitmap_start, &bitmap)
    }

    fn alloc_block(&self) -> Result<u32, KernelError> {
        let mut bitmap = self.block_bitmap.lock();
        let relative = alloc_bit(&mut bitmap, self.sb.total_blocks - self.sb.data_start, 0)
            .ok_or(KernelError::OutOfMemory { requested: 1, available: 0 })?;
        self.write_block(self.sb.block_bitmap_start, &bitmap)?;
        let block = self.sb.data_start + relative;
        let zero = vec![0u8; BLOCK_SIZE];
        self.write_block(block, &zero)?;
        Ok(block)
    }

    fn free_block(&self, block: u32) -> Result<(), KernelError> {
        let mut bitmap = self.block_bitmap.lock();
        bit_set(&mut bitmap, block - self.sb.data_start, false);
        self.write_block(self.sb.block_bitmap_start, &bitmap)
    }

    /// Resolves logical block `l` of `inode` to a physical block, allocating
    /// along the way if `grow` and the pointer is currently unused.
    fn block_for(&self, inode: &mut Inode, l: usize, grow: bool) -> Result<Option<u32>, KernelError> {
        if l < DIRECT_PTRS {
            if inode.direct[l] == 0 && grow {
                inode.direct[l] = self.alloc_block()?;
            }
            return Ok(if inode.direct[l] == 0 { None } else { Some(inode.direct[l]) });
        }

        let indirect_index = l - DIRECT_PTRS;
        if indirect_index >= PTRS_PER_INDIRECT_BLOCK {
            return Ok(None);
        }

        if inode.single_indirect == 0 {
            if !grow {
                return Ok(None);
            }
            inode.single_indirect = self.alloc_block()?;
        }

        let mut iblock = vec![0u8; BLOCK_SIZE];
        self.read_block(inode.single_indirect, &mut iblock)?;
        let off = indirect_index * 2;
        let ptr = u16::from_le_bytes([iblock[off], iblock[off + 1]]) as u32;

        if ptr == 0 && grow {
            let new_block = self.alloc_block()?;
            iblock[off..off + 2].copy_from_slice(&(new_block as u16).to_le_bytes());
            self.write_block(inode.single_indirect, &iblock)?;
            return Ok(Some(new_block));
        }

        Ok(if ptr == 0 { None } else { Some(ptr) })
    }
}

/// Lays out a fresh HFS volume: superblock, bitmaps, and a root directory.
pub fn format(device: &DeviceHandle, total_inodes: u32) -> Result<(), KernelError> {
    let total_blocks = {
        let dev = device.lock();
        dev.block_count() as u32
    };

    let inode_bitmap_start = 1;
    let inode_bitmap_blocks = (total_inodes as u64).div_ceil(8 * BLOCK_SIZE as u64) as u32;
    let block_bitmap_start = inode_bitmap_start + inode_bitmap_blocks;
    let block_bitmap_blocks = (total_blocks as u64).div_ceil(8 * BLOCK_SIZE as u64) as u32;
    let inode_table_start = block_bitmap_start + block_bitmap_blocks;
    let inode_table_blocks = (total_inodes as u64).div_ceil(INODES_PER_BLOCK as u64) as u32;
    let data_start = inode_table_start + inode_table_blocks;

    if data_start >= total_blocks {
        return Err(KernelError::InvalidArgument { name: "total_inodes", value: "volume too small" });
    }

    let sb = Superblock { total_blocks, total_inodes, inode_bitmap_start, block_bitmap_start, inode_table_start, data_start };
    blockdev::blkwrite(device, 0, &sb.encode())?;

    let mut inode_bitmap = vec![0u8; inode_bitmap_blocks as usize * BLOCK_SIZE];
    bit_set(&mut inode_bitmap, 0, true);
    bit_set(&mut inode_bitmap, ROOT_INODE, true);
    for block in 0..inode_bitmap_blocks {
        let start = block as usize * BLOCK_SIZE;
        blockdev::blkwrite(device, (inode_bitmap_start + block) as u64, &inode_bitmap[start..start + BLOCK_SIZE])?;
    }

    let mut block_bitmap = vec![0u8; block_bitmap_blocks as usize * BLOCK_SIZE];
    for block in 0..block_bitmap_blocks {
        let start = block as usize * BLOCK_SIZE;
        blockdev::blkwrite(device, (block_bitmap_start + block) as u64, &block_bitmap[start..start + BLOCK_SIZE])?;
    }

    let root_data_block = data_start;
    bit_set(&mut block_bitmap, 0, true);
    blockdev::blkwrite(device, block_bitmap_start as u64, &block_bitmap[..BLOCK_SIZE])?;

    let mut root_inode = Inode::empty(true);
    root_inode.direct[0] = root_data_block;
    root_inode.size = BLOCK_SIZE as u32;
    let mut inode_block = vec![0u8; BLOCK_SIZE];
    root_inode.encode(&mut inode_block[..INODE_SIZE]);
    blockdev::blkwrite(device, inode_table_start as u64, &inode_block)?;

    let zero = vec![0u8; BLOCK_SIZE];
    blockdev::blkwrite(device, root_data_block as u64, &zero)?;

    log::info!("[C6] hfs formatted: {} blocks, {} inodes", total_blocks, total_inodes);
    Ok(())
}

pub struct HfsFs(Arc<Inner>);

impl HfsFs {
    pub fn mount(device: DeviceHandle) -> Result<Self, KernelError> {
        let mut sb_buf = vec![0u8; BLOCK_SIZE];
        blockdev::blkread(&device, 0, &mut sb_buf)?;
        let sb = Superblock::decode(&sb_buf)?;

        let mut inode_bitmap = vec![0u8; sb.inode_bitmap_blocks() as usize * BLOCK_SIZE];
        for block in 0..sb.inode_bitmap_blocks() {
            let start = block as usize * BLOCK_SIZE;
            blockdev::blkread(&device, (sb.inode_bitmap_start + block) as u64, &mut inode_bitmap[start..start + BLOCK_SIZE])?;
        }

        let mut block_bitmap = vec![0u8; sb.block_bitmap_blocks() as usize * BLOCK_SIZE];
        for block in 0..sb.block_bitmap_blocks() {
            let start = block as usize * BLOCK_SIZE;
            blockdev::blkread(&device, (sb.block_bitmap_start + block) as u64, &mut block_bitmap[start..start + BLOCK_SIZE])?;
        }

        log::info!("[C6] hfs mounted: {} blocks, {} inodes", sb.total_blocks, sb.total_inodes);
        Ok(Self(Arc::new(Inner {
            device,
            sb,
            inode_bitmap: Mutex::new(inode_bitmap),
            block_bitmap: Mutex::new(block_bitmap),
        })))
    }
}

impl Filesystem for HfsFs {
    fn root(&self) -> Arc<dyn VfsNode> {
        Arc::new(Node { inner: self.0.clone(), inode_num: ROOT_INODE })
    }

    fn name(&self) -> &'static str {
        "hfs"
    }

    fn is_readonly(&self) -> bool {
        false
    }
}

struct RawDirEntry {
    inode: u32,
    name: String,
}

fn decode_dir_entry(buf: &[u8]) -> Option<RawDirEntry> {
    let inode = read_u32(buf, 0);
    if inode == 0 {
        return None;
    }
    let raw_name = &buf[4..4 + NAME_MAX];
    let end = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
    Some(RawDirEntry { inode, name: String::from_utf8_lossy(&raw_name[..end]).into_owned() })
}

fn encode_dir_entry(buf: &mut [u8], inode: u32, name: &str) {
    write_u32(buf, 0, inode);
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_MAX);
    buf[4..4 + n].copy_from_slice(&bytes[..n]);
    for b in &mut buf[4 + n..4 + NAME_MAX] {
        *b = 0;
    }
}

struct Node {
    inner: Arc<Inner>,
    inode_num: u32,
}

impl Node {
    fn inode(&self) -> Result<Inode, KernelError> {
        self.inner.read_inode(self.inode_num)
    }

    /// Iterates over `(logical_block, entry_index_within_block)` for every
    /// occupied directory-entry slot.
    fn for_each_entry(&self, mut f: impl FnMut(u32, usize, &RawDirEntry) -> bool) -> Result<(), KernelError> {
        let inode = self.inode()?;
        let block_count = (inode.size as usize).div_ceil(BLOCK_SIZE);
        let mut buf = vec![0u8; BLOCK_SIZE];

        for logical in 0..block_count {
            let mut inode_mut = inode;
            let Some(block) = self.inner.block_for(&mut inode_mut, logical, false)? else { continue };
            self.inner.read_block(block, &mut buf)?;

            for slot in 0..ENTRIES_PER_BLOCK {
                let entry_buf = &buf[slot * DIR_ENTRY_SIZE..(slot + 1) * DIR_ENTRY_SIZE];
                if let Some(entry) = decode_dir_entry(entry_buf) {
                    if f(logical as u32, slot, &entry) {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    fn find_entry(&self, name: &str) -> Result<Option<u32>, KernelError> {
        let mut found = None;
        self.for_each_entry(|_, _, entry| {
            if entry.name == name {
                found = Some(entry.inode);
                true
            } else {
                false
            }
        })?;
        Ok(found)
    }

    /// Appends `(inode_num, name)` as a new directory entry, growing the
    /// directory by one block if every existing slot is occupied.
    fn append_entry(&self, child_inode: u32, name: &str) -> Result<(), KernelError> {
        let mut inode = self.inode()?;
        let block_count = (inode.size as usize).div_ceil(BLOCK_SIZE).max(1);
        let mut buf = vec![0u8; BLOCK_SIZE];

        for logical in 0..block_count {
            let Some(block) = self.inner.block_for(&mut inode, logical, true)? else { continue };
            self.inner.read_block(block, &mut buf)?;

            for slot in 0..ENTRIES_PER_BLOCK {
                let entry_buf = &buf[slot * DIR_ENTRY_SIZE..(slot + 1) * DIR_ENTRY_SIZE];
                if read_u32(entry_buf, 0) == 0 {
                    let entry_buf = &mut buf[slot * DIR_ENTRY_SIZE..(slot + 1) * DIR_ENTRY_SIZE];
                    encode_dir_entry(entry_buf, child_inode, name);
                    self.inner.write_block(block, &buf)?;
                    if inode.size < ((logical + 1) * BLOCK_SIZE) as u32 {
                        inode.size = ((logical + 1) * BLOCK_SIZE) as u32;
                    }
                    self.inner.write_inode(self.inode_num, &inode)?;
                    return Ok(());
                }
            }
        }

        // Every existing block is full: grow by one block and place the
        // entry in its first slot.
        let new_logical = block_count;
        let block = self.inner.block_for(&mut inode, new_logical, true)?.expect("just allocated");
        let mut fresh = vec![0u8; BLOCK_SIZE];
        encode_dir_entry(&mut fresh[..DIR_ENTRY_SIZE], child_inode, name);
        self.inner.write_block(block, &fresh)?;
        inode.size = ((new_logical + 1) * BLOCK_SIZE) as u32;
        self.inner.write_inode(self.inode_num, &inode)
    }

    fn clear_entry(&self, name: &str) -> Result<u32, KernelError> {
        let mut removed = None;
        let inode = self.inode()?;
        let block_count = (inode.size as usize).div_ceil(BLOCK_SIZE);
        let mut buf = vec![0u8; BLOCK_SIZE];

        for logical in 0..block_count {
            let mut inode_mut = inode;
            let Some(block) = self.inner.block_for(&mut inode_mut, logical, false)? else { continue };
            self.inner.read_block(block, &mut buf)?;

            for slot in 0..ENTRIES_PER_BLOCK {
                let entry_buf = &buf[slot * DIR_ENTRY_SIZE..(slot + 1) * DIR_ENTRY_SIZE];
                if let Some(entry) = decode_dir_entry(entry_buf) {
                    if entry.name == name {
                        removed = Some(entry.inode);
                        let entry_buf = &mut buf[slot * DIR_ENTRY_SIZE..(slot + 1) * DIR_ENTRY_SIZE];
                        entry_buf.fill(0);
                        self.inner.write_block(block, &buf)?;
                        break;
                    }
                }
            }
            if removed.is_some() {
                break;
            }
        }

        removed.ok_or(KernelError::NotFound { resource: "hfs directory entry" })
    }
}

impl VfsNode for Node {
    fn node_type(&self) -> NodeType {
        if self.inode().map(|i| i.is_directory).unwrap_or(false) {
            NodeType::Directory
        } else {
            NodeType::File
        }
    }

    fn metadata(&self) -> Result<Metadata, KernelError> {
        let inode = self.inode()?;
        Ok(Metadata {
            node_type: if inode.is_directory { NodeType::Directory } else { NodeType::File },
            size: inode.size as usize,
        })
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let inode = self.inode()?;
        if inode.is_directory {
            return Err(KernelError::NotSupported { operation: "read on a directory" });
        }
        if offset >= inode.size as usize {
            return Ok(0);
        }
        let want = buf.len().min(inode.size as usize - offset);
        let mut copied = 0;
        let mut scratch = vec![0u8; BLOCK_SIZE];
        let mut inode_mut = inode;

        while copied < want {
            let logical = (offset + copied) / BLOCK_SIZE;
            let in_block = (offset + copied) % BLOCK_SIZE;
            let n = (BLOCK_SIZE - in_block).min(want - copied);

            match self.inner.block_for(&mut inode_mut, logical, false)? {
                Some(block) => {
                    self.inner.read_block(block, &mut scratch)?;
                    buf[copied..copied + n].copy_from_slice(&scratch[in_block..in_block + n]);
                }
                None => scratch[..n].fill(0),
            }
            copied += n;
        }
        Ok(copied)
    }

    fn write(&self, offset: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let mut inode = self.inode()?;
        if inode.is_directory {
            return Err(KernelError::NotSupported { operation: "write on a directory" });
        }

        let mut copied = 0;
        let mut scratch = vec![0u8; BLOCK_SIZE];

        while copied < buf.len() {
            let logical = (offset + copied) / BLOCK_SIZE;
            let in_block = (offset + copied) % BLOCK_SIZE;
            let n = (BLOCK_SIZE - in_block).min(buf.len() - copied);

            let block = self.inner.block_for(&mut inode, logical, true)?.ok_or(KernelError::OutOfMemory { requested: 1, available: 0 })?;
            if n < BLOCK_SIZE {
                self.inner.read_block(block, &mut scratch)?;
            }
            scratch[in_block..in_block + n].copy_from_slice(&buf[copied..copied + n]);
            self.inner.write_block(block, &scratch)?;
            copied += n;
        }

        let new_end = (offset + copied) as u32;
        if new_end > inode.size {
            inode.size = new_end;
        }
        self.inner.write_inode(self.inode_num, &inode)?;
        Ok(copied)
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, KernelError> {
        if !self.inode()?.is_directory {
            return Err(KernelError::NotSupported { operation: "readdir on a file" });
        }
        let mut out = Vec::new();
        self.for_each_entry(|_, _, entry| {
            let child_is_dir = self.inner.read_inode(entry.inode).map(|i| i.is_directory).unwrap_or(false);
            out.push(DirEntry {
                name: entry.name.clone(),
                node_type: if child_is_dir { NodeType::Directory } else { NodeType::File },
            });
            false
        })?;
        Ok(out)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        let inode_num = self.find_entry(name)?.ok_or(KernelError::NotFound { resource: "hfs directory entry" })?;
        Ok(Arc::new(Node { inner: self.inner.clone(), inode_num }))
    }

    fn create(&self, name: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        if !self.inode()?.is_directory {
            return Err(KernelError::NotSupported { operation: "create below a file" });
        }
        if self.find_entry(name)?.is_some() {
            return Err(KernelError::FsError(FsError::AlreadyExists));
        }
        let child_num = self.inner.alloc_inode()?;
        self.inner.write_inode(child_num, &Inode::empty(false))?;
        self.append_entry(child_num, name)?;
        Ok(Arc::new(Node { inner: self.inner.clone(), inode_num: child_num }))
    }

    fn mkdir(&self, name: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        if !self.inode()?.is_directory {
            return Err(KernelError::NotSupported { operation: "mkdir below a file" });
        }
        if self.find_entry(name)?.is_some() {
            return Err(KernelError::FsError(FsError::AlreadyExists));
        }
        let child_num = self.inner.alloc_inode()?;
        self.inner.write_inode(child_num, &Inode::empty(true))?;
        self.append_entry(child_num, name)?;
        Ok(Arc::new(Node { inner: self.inner.clone(), inode_num: child_num }))
    }

    fn remove(&self, name: &str) -> Result<(), KernelError> {
        let child_num = self.clear_entry(name)?;
        let child = self.inner.read_inode(child_num)?;
        if child.is_directory {
            let child_node = Node { inner: self.inner.clone(), inode_num: child_num };
            if !child_node.readdir()?.is_empty() {
                return Err(KernelError::FsError(FsError::DirectoryNotEmpty));
            }
        }
        for ptr in child.direct {
            if ptr != 0 {
                self.inner.free_block(ptr)?;
            }
        }
        if child.single_indirect != 0 {
            let mut iblock = vec![0u8; BLOCK_SIZE];
            self.inner.read_block(child.single_indirect, &mut iblock)?;
            for off in (0..BLOCK_SIZE).step_by(2) {
                let ptr = u16::from_le_bytes([iblock[off], iblock[off + 1]]) as u32;
                if ptr != 0 {
                    self.inner.free_block(ptr)?;
                }
            }
            self.inner.free_block(child.single_indirect)?;
        }
        self.inner.free_inode(child_num)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::{boxed::Box, string::String};

    use super::*;
    use crate::fs::blockdev::RamBlockDevice;

    fn mounted(name: &str, blocks: u64) -> HfsFs {
        let dev = RamBlockDevice::new(String::from(name), BLOCK_SIZE, blocks);
        let handle = blockdev::register(name, Box::new(dev)).unwrap();
        format(&handle, 32).unwrap();
        HfsFs::mount(handle).unwrap()
    }

    #[test]
    fn create_write_read_round_trips() {
        let fs = mounted("hfstest0", 512);
        let root = fs.root();
        let file = root.create("a.txt").unwrap();
        let n = file.write(0, b"hello hfs").unwrap();
        assert_eq!(n, 9);

        let mut buf = [0u8; 16];
        let read_back = root.lookup("a.txt").unwrap();
        let n = read_back.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello hfs");
    }

    #[test]
    fn overwrite_updates_size_monotonically() {
        let fs = mounted("hfstest1", 512);
        let root = fs.root();
        let file = root.create("b.txt").unwrap();
        file.write(0, b"0123456789").unwrap();
        file.write(2, b"XX").unwrap();
        assert_eq!(file.metadata().unwrap().size, 10);

        let mut buf = [0u8; 10];
        file.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"01XX456789");
    }

    #[test]
    fn file_spanning_more_than_direct_blocks_uses_indirect() {
        let fs = mounted("hfstest2", 4096);
        let root = fs.root();
        let file = root.create("big.bin").unwrap();

        let block = [0xABu8; BLOCK_SIZE];
        for i in 0..20 {
            file.write(i * BLOCK_SIZE, &block).unwrap();
        }
        assert_eq!(file.metadata().unwrap().size, 20 * BLOCK_SIZE);

        let mut buf = [0u8; BLOCK_SIZE];
        file.read(15 * BLOCK_SIZE, &mut buf).unwrap();
        assert_eq!(buf, block);
    }

    #[test]
    fn mkdir_then_remove_empty_dir_succeeds() {
        let fs = mounted("hfstest3", 512);
        let root = fs.root();
        root.mkdir("sub").unwrap();
        assert!(root.lookup("sub").unwrap().readdir().unwrap().is_empty());
        root.remove("sub").unwrap();
        assert!(root.lookup("sub").is_err());
    }

    #[test]
    fn remove_nonempty_dir_fails() {
        let fs = mounted("hfstest4", 512);
        let root = fs.root();
        let sub = root.mkdir("sub").unwrap();
        sub.create("inside.txt").unwrap();
        assert!(root.remove("sub").is_err());
    }

    #[test]
    fn duplicate_create_fails() {
        let fs = mounted("hfstest5", 512);
        let root = fs.root();
        root.create("dup.txt").unwrap();
        assert!(root.create("dup.txt").is_err());
    }

    #[test]
    fn out_of_inodes_is_reported() {
        let fs = mounted("hfstest6", 256);
        let root = fs.root();
        // total_inodes = 32, inode 0 reserved and 1 is root: 30 left.
        for i in 0..30 {
            root.create(&alloc::format!("f{}", i)).unwrap();
        }
        assert!(root.create("one-too-many").is_err());
    }
}
