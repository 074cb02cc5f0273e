//! Virtual filesystem layer (C6): a table of mounted filesystem instances
//! and the generic path-walking logic shared by every backend.

use alloc::{string::String, sync::Arc, vec::Vec};

use spin::Mutex;

use crate::{
    error::KernelError,
    fs::{blockdev::DeviceHandle, fat12, hfs},
};

/// Node kind, mirrored from each backend's on-disk representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub node_type: NodeType,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub node_type: NodeType,
}

/// Per-vnode operations. Every backend (FAT12, HFS) implements this for its
/// file and directory nodes; operations the backend does not support (e.g.
/// every mutator on the read-only FAT12 backend) fall back to the default
/// `NotSupported` bodies.
pub trait VfsNode: Send + Sync {
    fn node_type(&self) -> NodeType;
    fn metadata(&self) -> Result<Metadata, KernelError>;
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize, KernelError>;
    fn readdir(&self) -> Result<Vec<DirEntry>, KernelError>;
    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, KernelError>;

    fn write(&self, _offset: usize, _buf: &[u8]) -> Result<usize, KernelError> {
        Err(KernelError::NotSupported { operation: "write" })
    }

    fn create(&self, _name: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        Err(KernelError::NotSupported { operation: "create" })
    }

    fn mkdir(&self, _name: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        Err(KernelError::NotSupported { operation: "mkdir" })
    }

    fn remove(&self, _name: &str) -> Result<(), KernelError> {
        Err(KernelError::NotSupported { operation: "remove" })
    }
}

/// A mounted filesystem instance.
pub trait Filesystem: Send + Sync {
    fn root(&self) -> Arc<dyn VfsNode>;
    fn name(&self) -> &'static str;
    fn is_readonly(&self) -> bool;

    fn unmount(&self) -> Result<(), KernelError> {
        Ok(())
    }
}

/// Identifies which backend `mount` should hand a device to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Fat12,
    Hfs,
}

impl FsType {
    fn mount(self, device: DeviceHandle) -> Result<Arc<dyn Filesystem>, KernelError> {
        match self {
            FsType::Fat12 => Ok(Arc::new(fat12::Fat12Fs::mount(device)?)),
            FsType::Hfs => Ok(Arc::new(hfs::HfsFs::mount(device)?)),
        }
    }
}

struct Mount {
    fs: Arc<dyn Filesystem>,
}

static MOUNTS: Mutex<alloc::collections::BTreeMap<String, Mount>> = Mutex::new(alloc::collections::BTreeMap::new());

fn strip_leading_slash(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Mounts `device` under `fs_type` at `mount_path`. The leading slash of
/// `mount_path` is stripped; the first path component of every later lookup
/// identifies the mount.
pub fn mount(mount_path: &str, fs_type: FsType, device: DeviceHandle) -> Result<(), KernelError> {
    let key = String::from(strip_leading_slash(mount_path));
    let mut mounts = MOUNTS.lock();
    if mounts.contains_key(&key) {
        return Err(KernelError::FsError(crate::error::FsError::AlreadyMounted));
    }
    let fs = fs_type.mount(device)?;
    log::info!("[C6] mounted {:?} at /{}", fs_type, key);
    mounts.insert(key, Mount { fs });
    Ok(())
}

pub fn unmount(mount_path: &str) -> Result<(), KernelError> {
    let key = strip_leading_slash(mount_path);
    let mut mounts = MOUNTS.lock();
    let mount = mounts.remove(key).ok_or(KernelError::FsError(crate::error::FsError::NotMounted))?;
    mount.fs.unmount()?;
    log::info!("[C6] unmounted /{}", key);
    Ok(())
}

/// Splits `path` into its mounted filesystem and the remaining components
/// inside it, then walks those components from the backend's root.
fn resolve(path: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
    let trimmed = strip_leading_slash(path);
    let mut components = trimmed.split('/').filter(|c| !c.is_empty());
    let mount_name = components.next().ok_or(KernelError::NotFound { resource: "path" })?;

    let fs = {
        let mounts = MOUNTS.lock();
        mounts.get(mount_name).ok_or(KernelError::FsError(crate::error::FsError::NotMounted))?.fs.clone()
    };

    let mut node = fs.root();
    for component in components {
        node = node.lookup(component)?;
    }
    Ok(node)
}

fn split_parent(path: &str) -> Result<(&str, &str), KernelError> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Ok(("/", &trimmed[1..])),
        Some(pos) => Ok((&trimmed[..pos], &trimmed[pos + 1..])),
        None => Err(KernelError::InvalidArgument {
            name: "path",
            value: "missing parent component",
        }),
    }
}

/// An open file: the resolved vnode plus a cursor and access mode.
pub struct File {
    node: Arc<dyn VfsNode>,
    offset: usize,
    writable: bool,
}

pub fn open(path: &str) -> Result<File, KernelError> {
    let node = resolve(path)?;
    Ok(File { node, offset: 0, writable: false })
}

pub fn close(_file: File) {}

pub fn read(file: &mut File, buf: &mut [u8]) -> Result<usize, KernelError> {
    let n = file.node.read(file.offset, buf)?;
    file.offset += n;
    Ok(n)
}

pub fn write(file: &mut File, buf: &[u8]) -> Result<usize, KernelError> {
    let n = file.node.write(file.offset, buf)?;
    file.offset += n;
    file.writable = true;
    Ok(n)
}

pub fn create(path: &str) -> Result<File, KernelError> {
    let (parent_path, name) = split_parent(path)?;
    let parent = resolve(parent_path)?;
    let node = parent.create(name)?;
    Ok(File { node, offset: 0, writable: true })
}

pub fn mkdir(path: &str) -> Result<(), KernelError> {
    let (parent_path, name) = split_parent(path)?;
    let parent = resolve(parent_path)?;
    parent.mkdir(name)?;
    Ok(())
}

pub fn remove(path: &str) -> Result<(), KernelError> {
    let (parent_path, name) = split_parent(path)?;
    let parent = resolve(parent_path)?;
    parent.remove(name)
}

/// Lists the entries of the directory at `dir_path`.
pub fn fs_list(dir_path: &str) -> Result<Vec<DirEntry>, KernelError> {
    resolve(dir_path)?.readdir()
}

/// Returns metadata for the file or directory at `path`.
pub fn fs_stat_file(path: &str) -> Result<Metadata, KernelError> {
    resolve(path)?.metadata()
}

/// Lists the mount point names currently served by `fs_type`.
pub fn fs_stat(fs_type_name: &'static str) -> Vec<String> {
    MOUNTS
        .lock()
        .iter()
        .filter(|(_, m)| m.fs.name() == fs_type_name)
        .map(|(path, _)| path.clone())
        .collect()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::{boxed::Box, string::String};

    use super::*;
    use crate::fs::{blockdev, hfs::format};

    fn mounted_hfs(name: &str, blocks: u64) -> &'static str {
        let handle = blockdev::register(name, Box::new(blockdev::RamBlockDevice::new(String::from(name), 512, blocks))).unwrap();
        format(&handle, 32).unwrap();
        let path = alloc::format!("/{}", name);
        mount(Box::leak(path.into_boxed_str()), FsType::Hfs, handle).unwrap();
        Box::leak(alloc::format!("/{}", name).into_boxed_str())
    }

    #[test]
    fn mount_then_create_then_read_round_trips() {
        let root = mounted_hfs("vfsdisk0", 512);
        let path = alloc::format!("{}/hello.txt", root);

        let mut f = create(&path).unwrap();
        write(&mut f, b"hello vfs").unwrap();
        close(f);

        let mut f = open(&path).unwrap();
        let mut buf = [0u8; 16];
        let n = read(&mut f, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello vfs");
    }

    #[test]
    fn unmount_then_open_fails() {
        let root = mounted_hfs("vfsdisk1", 512);
        let key = root.trim_start_matches('/');
        unmount(key).unwrap();
        assert!(open(&alloc::format!("{}/anything", root)).is_err());
    }
}
