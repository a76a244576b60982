//! In-memory filesystem
//!
//! A tree of directories and byte-vector files, conventionally mounted at
//! `/tmp`. Contents live for the kernel's lifetime. File bodies are shared
//! between the tree and open handles, so data written through one
//! descriptor is visible to every later open of the same path.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::{Dirent, DirentKind, File, FileSystem, SuperBlock};
use crate::types::KernelError;

pub const RAMFS_MAGIC: u64 = 0x5241_4d46;

type FileData = Arc<Mutex<Vec<u8>>>;

enum Node {
    File(FileData),
    Dir(BTreeMap<String, Node>),
}

/// The in-memory tree
pub struct Ramfs {
    root: Mutex<Node>,
}

/// Backend instance registered at boot.
pub static RAMFS: Ramfs = Ramfs::new();

impl Ramfs {
    pub const fn new() -> Self {
        Ramfs {
            root: Mutex::new(Node::Dir(BTreeMap::new())),
        }
    }
}

/// Walk to the node at `path` (`/` is the root).
fn lookup<'a>(root: &'a Node, path: &str) -> Option<&'a Node> {
    let mut cur = root;
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        cur = match cur {
            Node::Dir(children) => children.get(seg)?,
            Node::File(_) => return None,
        };
    }
    Some(cur)
}

/// Walk to the directory containing `path`'s final segment.
///
/// Returns the parent's child map and the final segment name.
fn lookup_parent<'a, 'p>(
    root: &'a mut Node,
    path: &'p str,
) -> Result<(&'a mut BTreeMap<String, Node>, &'p str), KernelError> {
    let (dir_part, name) = path.rsplit_once('/').ok_or(KernelError::InvalidArgument)?;
    if name.is_empty() {
        return Err(KernelError::InvalidArgument);
    }

    let mut cur = root;
    for seg in dir_part.split('/').filter(|s| !s.is_empty()) {
        cur = match cur {
            Node::Dir(children) => children.get_mut(seg).ok_or(KernelError::NotFound)?,
            Node::File(_) => return Err(KernelError::NotADirectory),
        };
    }
    match cur {
        Node::Dir(children) => Ok((children, name)),
        Node::File(_) => Err(KernelError::NotADirectory),
    }
}

struct RamFile {
    data: FileData,
    pos: usize,
}

impl File for RamFile {
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

impl FileSystem for Ramfs {
    fn type_tag(&self) -> &'static str {
        "ramfs"
    }

    fn mount(&self) -> Result<SuperBlock, KernelError> {
        Ok(SuperBlock {
            magic: RAMFS_MAGIC,
            tag: self.type_tag(),
        })
    }

    fn open(&self, path: &str) -> Result<Box<dyn File>, KernelError> {
        let root = self.root.lock();
        match lookup(&root, path) {
            Some(Node::File(data)) => Ok(Box::new(RamFile {
                data: data.clone(),
                pos: 0,
            })),
            Some(Node::Dir(_)) => Err(KernelError::IsADirectory),
            None => Err(KernelError::NotFound),
        }
    }

    fn create(&self, path: &str) -> Result<Box<dyn File>, KernelError> {
        let mut root = self.root.lock();
        let (children, name) = lookup_parent(&mut root, path)?;

        if let Some(Node::Dir(_)) = children.get(name) {
            return Err(KernelError::IsADirectory);
        }
        // Touch semantics: creating over an existing file truncates it.
        let data: FileData = Arc::new(Mutex::new(Vec::new()));
        children.insert(name.to_string(), Node::File(data.clone()));
        Ok(Box::new(RamFile { data, pos: 0 }))
    }

    fn read_dir(&self, path: &str, out: &mut [Dirent]) -> Result<usize, KernelError> {
        let root = self.root.lock();
        let children = match lookup(&root, path) {
            Some(Node::Dir(children)) => children,
            Some(Node::File(_)) => return Err(KernelError::NotADirectory),
            None => return Err(KernelError::NotFound),
        };

        let mut written = 0;
        for (name, node) in children.iter() {
            if written >= out.len() {
                break;
            }
            out[written] = match node {
                Node::File(data) => Dirent::new(name, DirentKind::File, data.lock().len() as u64),
                Node::Dir(_) => Dirent::new(name, DirentKind::Directory, 0),
            };
            written += 1;
        }
        Ok(written)
    }

    fn mkdir(&self, path: &str) -> Result<(), KernelError> {
        let mut root = self.root.lock();
        let (children, name) = lookup_parent(&mut root, path)?;

        if children.contains_key(name) {
            return Err(KernelError::AlreadyExists);
        }
        children.insert(name.to_string(), Node::Dir(BTreeMap::new()));
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<(), KernelError> {
        let mut root = self.root.lock();
        let (children, name) = lookup_parent(&mut root, path)?;

        match children.get(name) {
            Some(Node::File(_)) => {
                children.remove(name);
                Ok(())
            }
            Some(Node::Dir(_)) => Err(KernelError::IsADirectory),
            None => Err(KernelError::NotFound),
        }
    }

    fn remove_recursive(&self, path: &str) -> Result<(), KernelError> {
        let mut root = self.root.lock();
        let (children, name) = lookup_parent(&mut root, path)?;

        children.remove(name).map(|_| ()).ok_or(KernelError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_then_read() {
        let fs = Ramfs::new();
        let mut f = fs.create("/a.txt").unwrap();
        f.write(b"Hello").unwrap();
        drop(f);

        let mut f = fs.open("/a.txt").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(f.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"Hello");
        assert_eq!(f.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn open_missing_fails() {
        let fs = Ramfs::new();
        assert_eq!(fs.open("/nope").err(), Some(KernelError::NotFound));
    }

    #[test]
    fn create_truncates_existing_file() {
        let fs = Ramfs::new();
        fs.create("/a").unwrap().write(b"old data").unwrap();
        fs.create("/a").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(fs.open("/a").unwrap().read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn mkdir_and_nested_create() {
        let fs = Ramfs::new();
        fs.mkdir("/d").unwrap();
        assert_eq!(fs.mkdir("/d").unwrap_err(), KernelError::AlreadyExists);

        fs.create("/d/inner.txt").unwrap();
        let mut out = [Dirent::empty(); 8];
        let n = fs.read_dir("/d", &mut out).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].name(), "inner.txt");
    }

    #[test]
    fn read_dir_lists_kinds_and_sizes() {
        let fs = Ramfs::new();
        fs.mkdir("/sub").unwrap();
        fs.create("/a.txt").unwrap().write(b"xyz").unwrap();

        let mut out = [Dirent::empty(); 8];
        let n = fs.read_dir("/", &mut out).unwrap();
        assert_eq!(n, 2);
        // BTreeMap iteration is name-ordered.
        assert_eq!(out[0].name(), "a.txt");
        assert_eq!(out[0].kind, DirentKind::File);
        assert_eq!(out[0].size, 3);
        assert_eq!(out[1].name(), "sub");
        assert_eq!(out[1].kind, DirentKind::Directory);
    }

    #[test]
    fn read_dir_on_file_is_an_error() {
        let fs = Ramfs::new();
        fs.create("/a").unwrap();
        let mut out = [Dirent::empty(); 1];
        assert_eq!(
            fs.read_dir("/a", &mut out).unwrap_err(),
            KernelError::NotADirectory
        );
    }

    #[test]
    fn unlink_removes_files_only() {
        let fs = Ramfs::new();
        fs.create("/a").unwrap();
        fs.mkdir("/d").unwrap();

        fs.unlink("/a").unwrap();
        assert_eq!(fs.open("/a").err(), Some(KernelError::NotFound));
        assert_eq!(fs.unlink("/d").unwrap_err(), KernelError::IsADirectory);
        assert_eq!(fs.unlink("/a").unwrap_err(), KernelError::NotFound);
    }

    #[test]
    fn remove_recursive_drops_a_subtree() {
        let fs = Ramfs::new();
        fs.mkdir("/d").unwrap();
        fs.mkdir("/d/e").unwrap();
        fs.create("/d/e/f").unwrap();

        fs.remove_recursive("/d").unwrap();
        let mut out = [Dirent::empty(); 1];
        assert_eq!(
            fs.read_dir("/d", &mut out).unwrap_err(),
            KernelError::NotFound
        );
    }

    #[test]
    fn writes_are_visible_to_later_opens() {
        let fs = Ramfs::new();
        fs.create("/a").unwrap();

        let mut w = fs.open("/a").unwrap();
        w.write(b"shared").unwrap();

        let mut r = fs.open("/a").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(r.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"shared");
    }
}
