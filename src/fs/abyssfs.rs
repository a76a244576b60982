//! Disk-backed filesystem
//!
//! AbyssFS keeps an in-core inode arena mirroring the on-disk tree and
//! pushes the superblock out through the block device. The block driver in
//! this revision returns zeroed sectors, so every mount finds no valid
//! superblock and formats a fresh root; durability is within the kernel's
//! lifetime, with the sector path exercised end to end.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::{Dirent, DirentKind, File, FileSystem, SuperBlock};
use crate::drivers::virtio;
use crate::types::KernelError;

pub const ABYSSFS_MAGIC: u64 = 0x4142_5953_4653_0001;

/// Sector holding the on-disk superblock.
const SUPER_SECTOR: u64 = 0;

type FileData = Arc<Mutex<Vec<u8>>>;

struct Inode {
    kind: DirentKind,
    data: FileData,
    children: BTreeMap<String, usize>,
}

impl Inode {
    fn dir() -> Self {
        Inode {
            kind: DirentKind::Directory,
            data: Arc::new(Mutex::new(Vec::new())),
            children: BTreeMap::new(),
        }
    }

    fn file() -> Self {
        Inode {
            kind: DirentKind::File,
            data: Arc::new(Mutex::new(Vec::new())),
            children: BTreeMap::new(),
        }
    }
}

struct AbyssInner {
    inodes: Vec<Option<Inode>>,
}

impl AbyssInner {
    /// Inode 0 is the root directory; created on first use.
    fn ensure_root(&mut self) {
        if self.inodes.is_empty() {
            self.inodes.push(Some(Inode::dir()));
        }
    }

    fn alloc_inode(&mut self, inode: Inode) -> usize {
        for (i, slot) in self.inodes.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(inode);
                return i;
            }
        }
        self.inodes.push(Some(inode));
        self.inodes.len() - 1
    }

    fn inode(&self, idx: usize) -> Option<&Inode> {
        self.inodes.get(idx)?.as_ref()
    }

    fn inode_mut(&mut self, idx: usize) -> Option<&mut Inode> {
        self.inodes.get_mut(idx)?.as_mut()
    }

    /// Walk to the inode at `path`.
    fn resolve(&self, path: &str) -> Option<usize> {
        let mut cur = 0usize;
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            let node = self.inode(cur)?;
            if node.kind != DirentKind::Directory {
                return None;
            }
            cur = *node.children.get(seg)?;
        }
        Some(cur)
    }

    /// Walk to the directory holding `path`'s final segment.
    fn resolve_parent<'p>(&self, path: &'p str) -> Result<(usize, &'p str), KernelError> {
        let (dir_part, name) = path.rsplit_once('/').ok_or(KernelError::InvalidArgument)?;
        if name.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let parent = self.resolve(dir_part).ok_or(KernelError::NotFound)?;
        match self.inode(parent) {
            Some(node) if node.kind == DirentKind::Directory => Ok((parent, name)),
            Some(_) => Err(KernelError::NotADirectory),
            None => Err(KernelError::NotFound),
        }
    }

    /// Drop an inode and everything under it.
    fn release(&mut self, idx: usize) {
        if let Some(node) = self.inodes.get_mut(idx).and_then(Option::take) {
            for (_, child) in node.children {
                self.release(child);
            }
        }
    }

    /// Write the superblock sector back through the block device.
    ///
    /// Best effort: a missing device leaves the in-core tree authoritative.
    /// TODO: stream the inode table and file extents once the virtqueue
    /// path in the block driver carries real data.
    fn sync(&self) {
        let mut sector = [0u8; virtio::SECTOR_SIZE];
        sector[..8].copy_from_slice(&ABYSSFS_MAGIC.to_le_bytes());
        sector[8..16].copy_from_slice(&(self.inodes.len() as u64).to_le_bytes());
        let _ = virtio::write(SUPER_SECTOR, &sector, 1);
    }
}

/// The disk-backed tree
pub struct AbyssFs {
    inner: Mutex<AbyssInner>,
}

/// Backend instance registered at boot.
pub static ABYSSFS: AbyssFs = AbyssFs::new();

impl AbyssFs {
    pub const fn new() -> Self {
        AbyssFs {
            inner: Mutex::new(AbyssInner { inodes: Vec::new() }),
        }
    }
}

struct AbyssFile {
    data: FileData,
    pos: usize,
}

impl File for AbyssFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError> {
        let data = self.data.lock();
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError> {
        let mut data = self.data.lock();
        let end = self.pos + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }
}

impl FileSystem for AbyssFs {
    fn type_tag(&self) -> &'static str {
        "abyssfs"
    }

    fn mount(&self) -> Result<SuperBlock, KernelError> {
        let mut inner = self.inner.lock();

        let mut sector = [0u8; virtio::SECTOR_SIZE];
        let on_disk_magic = match virtio::read(SUPER_SECTOR, &mut sector, 1) {
            Ok(()) => u64::from_le_bytes(sector[..8].try_into().unwrap_or([0; 8])),
            Err(_) => 0,
        };

        if on_disk_magic != ABYSSFS_MAGIC {
            // No valid superblock (or no device): format a fresh root.
            inner.inodes.clear();
        }
        inner.ensure_root();
        inner.sync();

        Ok(SuperBlock {
            magic: ABYSSFS_MAGIC,
            tag: self.type_tag(),
        })
    }

    fn open(&self, path: &str) -> Result<Box<dyn File>, KernelError> {
        let mut inner = self.inner.lock();
        inner.ensure_root();
        let idx = inner.resolve(path).ok_or(KernelError::NotFound)?;
        match inner.inode(idx) {
            Some(node) if node.kind == DirentKind::File => Ok(Box::new(AbyssFile {
                data: node.data.clone(),
                pos: 0,
            })),
            Some(_) => Err(KernelError::IsADirectory),
            None => Err(KernelError::NotFound),
        }
    }

    fn create(&self, path: &str) -> Result<Box<dyn File>, KernelError> {
        let mut inner = self.inner.lock();
        inner.ensure_root();
        let (parent, name) = inner.resolve_parent(path)?;

        if let Some(&existing) = inner.inode(parent).and_then(|p| p.children.get(name)) {
            match inner.inode(existing) {
                Some(node) if node.kind == DirentKind::File => {
                    // Touch semantics: truncate in place.
                    let data = node.data.clone();
                    data.lock().clear();
                    inner.sync();
                    return Ok(Box::new(AbyssFile { data, pos: 0 }));
                }
                _ => return Err(KernelError::IsADirectory),
            }
        }

        let inode = Inode::file();
        let data = inode.data.clone();
        let idx = inner.alloc_inode(inode);
        if let Some(parent) = inner.inode_mut(parent) {
            parent.children.insert(name.to_string(), idx);
        }
        inner.sync();
        Ok(Box::new(AbyssFile { data, pos: 0 }))
    }

    fn read_dir(&self, path: &str, out: &mut [Dirent]) -> Result<usize, KernelError> {
        let mut inner = self.inner.lock();
        inner.ensure_root();
        let idx = inner.resolve(path).ok_or(KernelError::NotFound)?;
        let node = inner.inode(idx).ok_or(KernelError::NotFound)?;
        if node.kind != DirentKind::Directory {
            return Err(KernelError::NotADirectory);
        }

        let mut written = 0;
        for (name, &child) in node.children.iter() {
            if written >= out.len() {
                break;
            }
            if let Some(child) = inner.inode(child) {
                let size = match child.kind {
                    DirentKind::File => child.data.lock().len() as u64,
                    DirentKind::Directory => 0,
                };
                out[written] = Dirent::new(name, child.kind, size);
                written += 1;
            }
        }
        Ok(written)
    }

    fn mkdir(&self, path: &str) -> Result<(), KernelError> {
        let mut inner = self.inner.lock();
        inner.ensure_root();
        let (parent, name) = inner.resolve_parent(path)?;

        if inner
            .inode(parent)
            .is_some_and(|p| p.children.contains_key(name))
        {
            return Err(KernelError::AlreadyExists);
        }
        let idx = inner.alloc_inode(Inode::dir());
        if let Some(parent) = inner.inode_mut(parent) {
            parent.children.insert(name.to_string(), idx);
        }
        inner.sync();
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<(), KernelError> {
        let mut inner = self.inner.lock();
        inner.ensure_root();
        let (parent, name) = inner.resolve_parent(path)?;

        let child = match inner.inode(parent).and_then(|p| p.children.get(name)) {
            Some(&idx) => idx,
            None => return Err(KernelError::NotFound),
        };
        match inner.inode(child) {
            Some(node) if node.kind == DirentKind::File => {}
            Some(_) => return Err(KernelError::IsADirectory),
            None => return Err(KernelError::NotFound),
        }

        if let Some(parent) = inner.inode_mut(parent) {
            parent.children.remove(name);
        }
        inner.release(child);
        inner.sync();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_formats_a_fresh_root() {
        let fs = AbyssFs::new();
        let sb = fs.mount().unwrap();
        assert_eq!(sb.magic, ABYSSFS_MAGIC);
        assert_eq!(sb.tag, "abyssfs");

        let mut out = [Dirent::empty(); 4];
        assert_eq!(fs.read_dir("/", &mut out).unwrap(), 0);
    }

    #[test]
    fn create_write_reopen_read() {
        let fs = AbyssFs::new();
        fs.mount().unwrap();

        fs.create("/motd").unwrap().write(b"deep").unwrap();
        let mut buf = [0u8; 8];
        let mut f = fs.open("/motd").unwrap();
        assert_eq!(f.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"deep");
    }

    #[test]
    fn mkdir_nested_and_list() {
        let fs = AbyssFs::new();
        fs.mount().unwrap();

        fs.mkdir("/bin").unwrap();
        fs.create("/bin/sh").unwrap();
        fs.mkdir("/bin/sub").unwrap();

        let mut out = [Dirent::empty(); 4];
        let n = fs.read_dir("/bin", &mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out[0].name(), "sh");
        assert_eq!(out[0].kind, DirentKind::File);
        assert_eq!(out[1].name(), "sub");
        assert_eq!(out[1].kind, DirentKind::Directory);
    }

    #[test]
    fn unlink_frees_the_inode_slot() {
        let fs = AbyssFs::new();
        fs.mount().unwrap();

        fs.create("/a").unwrap();
        fs.unlink("/a").unwrap();
        assert_eq!(fs.open("/a").err(), Some(KernelError::NotFound));

        // The freed slot is reused rather than growing the arena.
        fs.create("/b").unwrap();
        let inner = fs.inner.lock();
        assert_eq!(inner.inodes.len(), 2);
    }

    #[test]
    fn unlink_rejects_directories() {
        let fs = AbyssFs::new();
        fs.mount().unwrap();
        fs.mkdir("/d").unwrap();
        assert_eq!(fs.unlink("/d"), Err(KernelError::IsADirectory));
    }

    #[test]
    fn remove_recursive_is_unsupported() {
        let fs = AbyssFs::new();
        fs.mount().unwrap();
        fs.mkdir("/d").unwrap();
        assert_eq!(fs.remove_recursive("/d"), Err(KernelError::Unsupported));
    }
}
