//! Filesystem layer
//!
//! The VFS talks to filesystem backends through the small capability set in
//! [`FileSystem`] and [`File`]. Backends own their internals; the VFS holds
//! only opaque file handles and never looks inside.

use alloc::boxed::Box;

use crate::types::KernelError;

pub mod abyssfs;
pub mod ramfs;
pub mod vfs;

/// Registered filesystem types bound.
pub const MAX_FS: usize = 4;

/// Bytes reserved for a directory entry name, including the terminator.
pub const DIRENT_NAME_LEN: usize = 60;

/// What a directory entry names
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentKind {
    File = 0,
    Directory = 1,
}

/// Directory entry as produced by `read_dir`
///
/// Plain data: this record is copied verbatim into caller buffers, so it
/// stays `repr(C)` with a fixed-size NUL-terminated name.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Dirent {
    pub name: [u8; DIRENT_NAME_LEN],
    pub kind: DirentKind,
    pub size: u64,
}

impl Dirent {
    pub const fn empty() -> Self {
        Dirent {
            name: [0; DIRENT_NAME_LEN],
            kind: DirentKind::File,
            size: 0,
        }
    }

    /// Build an entry, truncating the name to what fits.
    pub fn new(name: &str, kind: DirentKind, size: u64) -> Self {
        let mut entry = Dirent {
            name: [0; DIRENT_NAME_LEN],
            kind,
            size,
        };
        let n = name.len().min(DIRENT_NAME_LEN - 1);
        entry.name[..n].copy_from_slice(&name.as_bytes()[..n]);
        entry
    }

    /// The entry name up to the NUL terminator.
    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DIRENT_NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

/// Backend-owned root of a mounted filesystem
#[derive(Debug, Clone, Copy)]
pub struct SuperBlock {
    pub magic: u64,
    pub tag: &'static str,
}

/// An open file as the VFS sees it
///
/// Allocated by `open`/`create`, freed when the descriptor closes. The
/// implementing type is the backend's private data.
pub trait File {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError>;
    /// Flush or release backend state; dropping the handle follows.
    fn close(&mut self) {}
}

/// The filesystem backend contract
///
/// Paths handed to a backend are mount-relative, normalized, and absolute
/// (`/` names the backend root). `remove_recursive` is optional; the
/// default reports it unsupported.
pub trait FileSystem: Sync {
    fn type_tag(&self) -> &'static str;

    fn mount(&self) -> Result<SuperBlock, KernelError>;

    fn open(&self, path: &str) -> Result<Box<dyn File>, KernelError>;

    fn create(&self, path: &str) -> Result<Box<dyn File>, KernelError>;

    /// Fill `out` with entries; returns how many were written.
    fn read_dir(&self, path: &str, out: &mut [Dirent]) -> Result<usize, KernelError>;

    fn mkdir(&self, path: &str) -> Result<(), KernelError>;

    fn unlink(&self, path: &str) -> Result<(), KernelError>;

    fn remove_recursive(&self, path: &str) -> Result<(), KernelError> {
        let _ = path;
        Err(KernelError::Unsupported)
    }
}
