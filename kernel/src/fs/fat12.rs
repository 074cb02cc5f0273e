//! FAT12 backend (C6), read-only in this design: parses the BPB, caches the
//! FAT table, and resolves files directly in the root directory.

use alloc::{string::String, sync::Arc, vec, vec::Vec};

use crate::{
    error::{FsError, KernelError},
    fs::{
        blockdev::{self, DeviceHandle},
        vfs::{DirEntry, Filesystem, Metadata, NodeType, VfsNode},
    },
};

const SECTOR_SIZE: usize = 512;
const DIR_ENTRY_SIZE: usize = 32;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const DIR_ENTRY_FREE: u8 = 0x00;
const DIR_ENTRY_DELETED: u8 = 0xE5;
const FAT12_EOC: u16 = 0xFF8;
const FAT12_BAD: u16 = 0xFF7;

struct Bpb {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    num_fats: u8,
    root_entries: u16,
    sectors_per_fat: u16,
    hidden_sectors: u32,
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

impl Bpb {
    fn parse(sector0: &[u8]) -> Result<Self, KernelError> {
        if sector0.len() < 36 {
            return Err(KernelError::FsError(FsError::BadMagic));
        }
        Ok(Self {
            bytes_per_sector: read_u16(sector0, 11),
            sectors_per_cluster: sector0[13],
            reserved_sectors: read_u16(sector0, 14),
            num_fats: sector0[16],
            root_entries: read_u16(sector0, 17),
            sectors_per_fat: read_u16(sector0, 22),
            hidden_sectors: read_u32(sector0, 28),
        })
    }

    fn fat_start(&self) -> u32 {
        self.hidden_sectors + self.reserved_sectors as u32
    }

    fn root_dir_start(&self) -> u32 {
        self.fat_start() + self.num_fats as u32 * self.sectors_per_fat as u32
    }

    fn root_dir_sectors(&self) -> u32 {
        let bytes = self.root_entries as u32 * DIR_ENTRY_SIZE as u32;
        bytes.div_ceil(self.bytes_per_sector as u32)
    }

    fn data_start(&self) -> u32 {
        self.root_dir_start() + self.root_dir_sectors()
    }
}

/// Shared, read-only filesystem state every vnode refers back to.
struct Inner {
    device: DeviceHandle,
    bpb: Bpb,
    fat: Vec<u8>,
}

impl Inner {
    fn fat_entry(&self, cluster: u32) -> u16 {
        let offset = (cluster as usize * 3) / 2;
        let word = read_u16(&self.fat, offset);
        if cluster % 2 == 0 {
            word & 0x0FFF
        } else {
            word >> 4
        }
    }

    fn cluster_to_lba(&self, cluster: u32) -> u32 {
        self.bpb.data_start() + (cluster - 2) * self.bpb.sectors_per_cluster as u32
    }

    fn read_sector(&self, lba: u32, buf: &mut [u8]) -> Result<(), KernelError> {
        blockdev::blkread(&self.device, lba as u64, buf)
    }

    fn bytes_per_cluster(&self) -> usize {
        self.bpb.sectors_per_cluster as usize * self.bpb.bytes_per_sector as usize
    }
}

pub struct Fat12Fs(Arc<Inner>);

impl Fat12Fs {
    pub fn mount(device: DeviceHandle) -> Result<Self, KernelError> {
        let mut sector0 = vec![0u8; SECTOR_SIZE];
        blockdev::blkread(&device, 0, &mut sector0)?;
        let bpb = Bpb::parse(&sector0)?;

        let fat_bytes = bpb.sectors_per_fat as usize * bpb.bytes_per_sector as usize;
        let mut fat = vec![0u8; fat_bytes];
        for sector in 0..bpb.sectors_per_fat as u32 {
            let lba = bpb.fat_start() + sector;
            let start = sector as usize * bpb.bytes_per_sector as usize;
            let end = start + bpb.bytes_per_sector as usize;
            blockdev::blkread(&device, lba as u64, &mut fat[start..end])?;
        }

        log::info!("[C6] fat12 mounted: {} root entries, {} sectors/fat", bpb.root_entries, bpb.sectors_per_fat);
        Ok(Self(Arc::new(Inner { device, bpb, fat })))
    }
}

impl Filesystem for Fat12Fs {
    fn root(&self) -> Arc<dyn VfsNode> {
        Arc::new(RootDir(self.0.clone()))
    }

    fn name(&self) -> &'static str {
        "fat12"
    }

    fn is_readonly(&self) -> bool {
        true
    }
}

/// A raw 32-byte FAT directory entry, decoded into the fields the read path
/// needs.
#[derive(Clone, Copy)]
struct RawEntry {
    short_name: [u8; 11],
    first_cluster: u32,
    size: u32,
}

fn to_8_3(name: &str) -> [u8; 11] {
    let mut out = [b' '; 11];
    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) => (s, e),
        None => (name, ""),
    };
    for (i, b) in stem.bytes().take(8).enumerate() {
        out[i] = b.to_ascii_uppercase();
    }
    for (i, b) in ext.bytes().take(3).enumerate() {
        out[8 + i] = b.to_ascii_uppercase();
    }
    out
}

struct RootDir(Arc<Inner>);

impl RootDir {
    fn entries(&self) -> Result<Vec<RawEntry>, KernelError> {
        let inner = &self.0;
        let mut out = Vec::new();
        let mut buf = vec![0u8; inner.bpb.bytes_per_sector as usize];

        'sectors: for sector_idx in 0..inner.bpb.root_dir_sectors() {
            let lba = inner.bpb.root_dir_start() + sector_idx;
            inner.read_sector(lba, &mut buf)?;

            for chunk in buf.chunks(DIR_ENTRY_SIZE) {
                if chunk.len() < DIR_ENTRY_SIZE {
                    break;
                }
                match chunk[0] {
                    DIR_ENTRY_FREE => break 'sectors,
                    DIR_ENTRY_DELETED => continue,
                    _ => {}
                }
                let attr = chunk[11];
                if attr & ATTR_VOLUME_ID != 0 {
                    continue;
                }
                let mut short_name = [0u8; 11];
                short_name.copy_from_slice(&chunk[0..11]);
                out.push(RawEntry {
                    short_name,
                    first_cluster: read_u16(chunk, 26) as u32,
                    size: read_u32(chunk, 28),
                });
            }
        }
        Ok(out)
    }
}

impl VfsNode for RootDir {
    fn node_type(&self) -> NodeType {
        NodeType::Directory
    }

    fn metadata(&self) -> Result<Metadata, KernelError> {
        Ok(Metadata { node_type: NodeType::Directory, size: 0 })
    }

    fn read(&self, _offset: usize, _buf: &mut [u8]) -> Result<usize, KernelError> {
        Err(KernelError::NotSupported { operation: "read on a directory" })
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, KernelError> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|e| DirEntry {
                name: String::from_utf8_lossy(&e.short_name).trim_end().into(),
                node_type: NodeType::File,
            })
            .collect())
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        let wanted = to_8_3(name);
        let entry = self
            .entries()?
            .into_iter()
            .find(|e| e.short_name == wanted)
            .ok_or(KernelError::NotFound { resource: "fat12 directory entry" })?;
        Ok(Arc::new(FileNode { inner: self.0.clone(), entry }))
    }
}

struct FileNode {
    inner: Arc<Inner>,
    entry: RawEntry,
}

impl VfsNode for FileNode {
    fn node_type(&self) -> NodeType {
        NodeType::File
    }

    fn metadata(&self) -> Result<Metadata, KernelError> {
        Ok(Metadata { node_type: NodeType::File, size: self.entry.size as usize })
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let file_size = self.entry.size as usize;
        if offset >= file_size {
            return Ok(0);
        }
        let want = buf.len().min(file_size - offset);
        if want == 0 {
            return Ok(0);
        }

        let bytes_per_cluster = self.inner.bytes_per_cluster();
        let mut cluster = self.entry.first_cluster;
        let mut skipped_clusters = offset / bytes_per_cluster;
        let mut scratch = vec![0u8; bytes_per_cluster];
        let mut copied = 0;
        let mut cursor_in_cluster = offset % bytes_per_cluster;

        while copied < want {
            if cluster as u16 >= FAT12_EOC as u16 || cluster as u16 == FAT12_BAD {
                break;
            }

            if skipped_clusters > 0 {
                skipped_clusters -= 1;
            } else {
                self.inner.read_sector(self.inner.cluster_to_lba(cluster), &mut scratch)?;
                let copy_start = cursor_in_cluster;
                let copy_end = bytes_per_cluster.min(copy_start + (want - copied));
                let n = copy_end - copy_start;
                buf[copied..copied + n].copy_from_slice(&scratch[copy_start..copy_end]);
                copied += n;
                cursor_in_cluster = 0;
            }

            cluster = self.inner.fat_entry(cluster) as u32;
        }

        Ok(copied)
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, KernelError> {
        Err(KernelError::NotSupported { operation: "readdir on a file" })
    }

    fn lookup(&self, _name: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        Err(KernelError::NotSupported { operation: "lookup below a file" })
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::{boxed::Box, string::String};

    use super::*;
    use crate::fs::blockdev::RamBlockDevice;

    /// Builds a minimal 1-sector-per-FAT, 1-cluster-per-sector FAT12 image
    /// with a single root-directory file `HELLO.TXT` containing `content`.
    fn build_image(content: &[u8]) -> RamBlockDevice {
        const RESERVED: u16 = 1;
        const NUM_FATS: u8 = 1;
        const SECTORS_PER_FAT: u16 = 1;
        const ROOT_ENTRIES: u16 = 16;
        const TOTAL_SECTORS: u64 = 64;

        let mut dev = RamBlockDevice::new(String::from("fattest"), SECTOR_SIZE, TOTAL_SECTORS);

        let mut bpb = vec![0u8; SECTOR_SIZE];
        bpb[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        bpb[13] = 1; // sectors_per_cluster
        bpb[14..16].copy_from_slice(&RESERVED.to_le_bytes());
        bpb[16] = NUM_FATS;
        bpb[17..19].copy_from_slice(&ROOT_ENTRIES.to_le_bytes());
        bpb[22..24].copy_from_slice(&SECTORS_PER_FAT.to_le_bytes());
        bpb[28..32].copy_from_slice(&0u32.to_le_bytes());
        dev.write_blocks(0, &bpb).unwrap();

        // FAT: cluster 2 is the only cluster and is end-of-chain.
        let mut fat = vec![0u8; SECTOR_SIZE];
        fat[3] = 0xF8;
        fat[4] = 0xFF;
        dev.write_blocks(RESERVED as u64, &fat).unwrap();

        let root_dir_start = RESERVED as u64 + NUM_FATS as u64 * SECTORS_PER_FAT as u64;
        let mut root = vec![0u8; SECTOR_SIZE];
        root[0..11].copy_from_slice(b"HELLO   TXT");
        root[26..28].copy_from_slice(&2u16.to_le_bytes());
        root[28..32].copy_from_slice(&(content.len() as u32).to_le_bytes());
        dev.write_blocks(root_dir_start, &root).unwrap();

        let data_start = root_dir_start + (ROOT_ENTRIES as u64 * DIR_ENTRY_SIZE as u64).div_ceil(SECTOR_SIZE as u64);
        let mut cluster = vec![0u8; SECTOR_SIZE];
        cluster[..content.len()].copy_from_slice(content);
        dev.write_blocks(data_start, &cluster).unwrap();

        dev
    }

    fn mount(dev: RamBlockDevice) -> Fat12Fs {
        use crate::fs::blockdev::BlockDevice as _;
        let handle = blockdev::register(dev.name(), Box::new(dev)).unwrap();
        Fat12Fs::mount(handle).unwrap()
    }

    #[test]
    fn opens_and_reads_a_root_file() {
        let fs = mount(build_image(b"hello, fat12"));
        let root = fs.root();
        let file = root.lookup("hello.txt").unwrap();
        let mut buf = [0u8; 32];
        let n = file.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello, fat12");
    }

    #[test]
    fn missing_file_is_not_found() {
        let fs = mount(build_image(b"x"));
        assert!(fs.root().lookup("missing.txt").is_err());
    }

    #[test]
    fn write_is_not_supported() {
        let fs = mount(build_image(b"x"));
        let file = fs.root().lookup("hello.txt").unwrap();
        assert!(file.write(0, b"y").is_err());
    }

    #[test]
    fn nested_path_below_root_is_not_found() {
        let fs = mount(build_image(b"x"));
        let root = fs.root();
        assert!(root.lookup("subdir").is_err());
    }
}
