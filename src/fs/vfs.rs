//! Virtual file system
//!
//! Owns the three process-wide tables: the filesystem-type registry, the
//! mount table, and the file-descriptor table. Paths arriving here are
//! absolute and normalized; the longest-prefix mount match picks the
//! backend and the backend sees the path relative to its mount point.

use alloc::boxed::Box;

use super::{abyssfs, ramfs, Dirent, File, FileSystem, SuperBlock, MAX_FS};
use crate::types::{Fd, KernelError, PathBuf};

/// Mount table bound.
pub const MAX_MOUNTS: usize = 8;
/// File descriptor table bound.
pub const MAX_FD: usize = 32;

const MAX_MOUNT_PATH: usize = 64;

struct Mount {
    path: heapless::String<MAX_MOUNT_PATH>,
    fs: &'static dyn FileSystem,
    sb: SuperBlock,
}

/// The VFS state
pub struct Vfs {
    filesystems: heapless::Vec<&'static dyn FileSystem, MAX_FS>,
    mounts: heapless::Vec<Mount, MAX_MOUNTS>,
    files: [Option<Box<dyn File>>; MAX_FD],
}

impl Vfs {
    pub fn new() -> Self {
        Vfs {
            filesystems: heapless::Vec::new(),
            mounts: heapless::Vec::new(),
            files: core::array::from_fn(|_| None),
        }
    }

    /// Add a backend to the type registry.
    pub fn register(&mut self, fs: &'static dyn FileSystem) -> Result<(), KernelError> {
        self.filesystems.push(fs).map_err(|_| KernelError::Exhausted)
    }

    /// Look a registered backend up by its type tag.
    pub fn find_type(&self, tag: &str) -> Option<&'static dyn FileSystem> {
        self.filesystems
            .iter()
            .find(|fs| fs.type_tag() == tag)
            .copied()
    }

    /// Mount a backend at `path`. Mount paths must be distinct.
    pub fn mount(&mut self, path: &str, fs: &'static dyn FileSystem) -> Result<(), KernelError> {
        let norm = normalize_path(path);
        if self.mounts.iter().any(|m| m.path.as_str() == norm.as_str()) {
            return Err(KernelError::AlreadyExists);
        }
        if self.mounts.is_full() {
            return Err(KernelError::Exhausted);
        }

        let sb = fs.mount()?;
        let mut mount_path = heapless::String::new();
        mount_path
            .push_str(&norm)
            .map_err(|_| KernelError::InvalidArgument)?;

        crate::println!("vfs: mounted {} at {} (magic {:#x})", sb.tag, norm, sb.magic);
        self.mounts
            .push(Mount {
                path: mount_path,
                fs,
                sb,
            })
            .map_err(|_| KernelError::Exhausted)
    }

    /// Mount paths with their superblocks, in mount order.
    pub fn mount_points(&self) -> impl Iterator<Item = (&str, &SuperBlock)> + '_ {
        self.mounts.iter().map(|m| (m.path.as_str(), &m.sb))
    }

    /// Longest-prefix mount match on whole segments.
    fn find_mount(&self, path: &str) -> Option<(&'static dyn FileSystem, usize)> {
        let mut best: Option<(&'static dyn FileSystem, usize)> = None;
        for mount in self.mounts.iter() {
            let mp = mount.path.as_str();
            let matched = if mp == "/" {
                path.starts_with('/')
            } else {
                path == mp
                    || (path.starts_with(mp) && path.as_bytes().get(mp.len()) == Some(&b'/'))
            };
            if matched && best.map_or(true, |(_, len)| mp.len() > len) {
                best = Some((mount.fs, mp.len()));
            }
        }
        best
    }

    fn alloc_fd(&mut self, file: Box<dyn File>) -> Result<Fd, KernelError> {
        for (i, slot) in self.files.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(Fd(i));
            }
        }
        crate::println!("vfs: no free file descriptors");
        Err(KernelError::Exhausted)
    }

    fn file_mut(&mut self, fd: Fd) -> Result<&mut Box<dyn File>, KernelError> {
        self.files
            .get_mut(fd.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(KernelError::BadDescriptor)
    }

    /// Open an existing file, returning a fresh descriptor.
    pub fn open(&mut self, path: &str) -> Result<Fd, KernelError> {
        let (fs, mlen) = self.find_mount(path).ok_or(KernelError::NotFound)?;
        let file = fs.open(mount_relative(mlen, path))?;
        self.alloc_fd(file)
    }

    /// Create (or truncate) a file, returning a descriptor open for writing.
    pub fn create(&mut self, path: &str) -> Result<Fd, KernelError> {
        let (fs, mlen) = self.find_mount(path).ok_or(KernelError::NotFound)?;
        let file = fs.create(mount_relative(mlen, path))?;
        self.alloc_fd(file)
    }

    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.file_mut(fd)?.read(buf)
    }

    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, KernelError> {
        self.file_mut(fd)?.write(buf)
    }

    /// Close a descriptor and free its slot for reuse.
    pub fn close(&mut self, fd: Fd) -> Result<(), KernelError> {
        let mut file = self
            .files
            .get_mut(fd.0)
            .and_then(Option::take)
            .ok_or(KernelError::BadDescriptor)?;
        file.close();
        Ok(())
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), KernelError> {
        let (fs, mlen) = self.find_mount(path).ok_or(KernelError::NotFound)?;
        fs.mkdir(mount_relative(mlen, path))
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), KernelError> {
        let (fs, mlen) = self.find_mount(path).ok_or(KernelError::NotFound)?;
        fs.unlink(mount_relative(mlen, path))
    }

    pub fn read_dir(&self, path: &str, out: &mut [Dirent]) -> Result<usize, KernelError> {
        let (fs, mlen) = self.find_mount(path).ok_or(KernelError::NotFound)?;
        fs.read_dir(mount_relative(mlen, path), out)
    }

    /// Forwarded to the backend's optional recursive remove.
    pub fn remove_recursive(&mut self, path: &str) -> Result<(), KernelError> {
        let (fs, mlen) = self.find_mount(path).ok_or(KernelError::NotFound)?;
        fs.remove_recursive(mount_relative(mlen, path))
    }
}

/// Strip the mount prefix so the backend sees a path rooted at its mount.
fn mount_relative(mount_len: usize, path: &str) -> &str {
    if mount_len <= 1 {
        return path;
    }
    let tail = &path[mount_len..];
    if tail.is_empty() {
        "/"
    } else {
        tail
    }
}

/// Canonical path normalization
///
/// Collapses `//`, drops `.`, resolves `..` against the built prefix (never
/// above the root), and strips any trailing `/` except for `/` itself.
pub fn normalize_path(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    let absolute = path.starts_with('/');
    if absolute {
        let _ = out.push('/');
    }

    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => match out.rfind('/') {
                Some(pos) if out.len() > 1 => {
                    out.truncate(pos.max(1));
                }
                Some(_) => {} // already at root
                None => out.clear(),
            },
            seg => {
                if !out.is_empty() && !out.ends_with('/') {
                    let _ = out.push('/');
                }
                let _ = out.push_str(seg);
            }
        }
    }

    if out.is_empty() && absolute {
        let _ = out.push('/');
    }
    out
}

/// Absolutize `path` against `cwd`, then normalize.
pub fn absolute_path(cwd: &str, path: &str) -> PathBuf {
    if path.starts_with('/') {
        return normalize_path(path);
    }
    let mut joined = PathBuf::new();
    let _ = joined.push_str(cwd);
    if !joined.ends_with('/') {
        let _ = joined.push('/');
    }
    let _ = joined.push_str(path);
    normalize_path(&joined)
}

// The VFS is process-wide state mutated only by the RUNNING process; the
// cooperative model admits no concurrent handler, so a plain static with an
// accessor suffices.
static mut VFS: Option<Vfs> = None;

/// Initialize the VFS: register both backends, mount `/` on abyssfs and
/// `/tmp` on ramfs.
pub fn init() -> Result<(), KernelError> {
    let mut vfs = Vfs::new();
    vfs.register(&abyssfs::ABYSSFS)?;
    vfs.register(&ramfs::RAMFS)?;
    vfs.mount("/", &abyssfs::ABYSSFS)?;
    vfs.mount("/tmp", &ramfs::RAMFS)?;

    unsafe {
        VFS = Some(vfs);
    }
    Ok(())
}

/// Get the global VFS instance
pub fn get() -> Option<&'static mut Vfs> {
    unsafe { (*core::ptr::addr_of_mut!(VFS)).as_mut() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::Ramfs;
    use crate::fs::DirentKind;

    fn leaked_ramfs() -> &'static Ramfs {
        Box::leak(Box::new(Ramfs::new()))
    }

    fn two_mount_vfs() -> (Vfs, &'static Ramfs, &'static Ramfs) {
        let root = leaked_ramfs();
        let tmp = leaked_ramfs();
        let mut vfs = Vfs::new();
        vfs.register(root).unwrap();
        vfs.register(tmp).unwrap();
        vfs.mount("/", root).unwrap();
        vfs.mount("/tmp", tmp).unwrap();
        (vfs, root, tmp)
    }

    #[test]
    fn normalize_collapses_and_resolves() {
        assert_eq!(normalize_path("/").as_str(), "/");
        assert_eq!(normalize_path("//a///b").as_str(), "/a/b");
        assert_eq!(normalize_path("/a/./b").as_str(), "/a/b");
        assert_eq!(normalize_path("/a/../b").as_str(), "/b");
        assert_eq!(normalize_path("/a/b/../..").as_str(), "/");
        assert_eq!(normalize_path("/..").as_str(), "/");
        assert_eq!(normalize_path("/a/").as_str(), "/a");
        assert_eq!(normalize_path("a/../b").as_str(), "b");
        assert_eq!(normalize_path("../a").as_str(), "a");
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in ["/", "//a///b", "/a/./b/..", "/tmp/x/", "a/b/../c"] {
            let once = normalize_path(p);
            let twice = normalize_path(&once);
            assert_eq!(once.as_str(), twice.as_str());
        }
    }

    #[test]
    fn absolute_path_joins_relative_against_cwd() {
        assert_eq!(absolute_path("/tmp", "a.txt").as_str(), "/tmp/a.txt");
        assert_eq!(absolute_path("/tmp", "./sub/../").as_str(), "/tmp");
        assert_eq!(absolute_path("/", "x").as_str(), "/x");
        assert_eq!(absolute_path("/tmp", "/abs").as_str(), "/abs");
    }

    #[test]
    fn longest_prefix_mount_wins() {
        let (mut vfs, root, tmp) = two_mount_vfs();

        vfs.create("/tmp/a").unwrap();
        let mut out = [Dirent::empty(); 4];
        // The file landed in the /tmp backend, under its own root.
        assert_eq!(tmp.read_dir("/", &mut out).unwrap(), 1);
        assert_eq!(out[0].name(), "a");
        assert_eq!(root.read_dir("/", &mut out).unwrap(), 0);
    }

    #[test]
    fn prefix_match_is_segment_aware() {
        let (mut vfs, root, tmp) = two_mount_vfs();

        vfs.create("/tmpfoo").unwrap();
        let mut out = [Dirent::empty(); 4];
        assert_eq!(root.read_dir("/", &mut out).unwrap(), 1);
        assert_eq!(out[0].name(), "tmpfoo");
        assert_eq!(tmp.read_dir("/", &mut out).unwrap(), 0);
    }

    #[test]
    fn open_read_write_close_round_trip() {
        let (mut vfs, _, _) = two_mount_vfs();

        let fd = vfs.create("/tmp/b.txt").unwrap();
        assert_eq!(vfs.write(fd, b"Hello").unwrap(), 5);
        vfs.close(fd).unwrap();

        let fd = vfs.open("/tmp/b.txt").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(vfs.read(fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"Hello");
        assert_eq!(vfs.read(fd, &mut buf).unwrap(), 0);
        vfs.close(fd).unwrap();
    }

    #[test]
    fn closed_descriptors_are_reused_lowest_first() {
        let (mut vfs, _, _) = two_mount_vfs();

        let a = vfs.create("/a").unwrap();
        let b = vfs.create("/b").unwrap();
        assert_eq!(a, Fd(0));
        assert_eq!(b, Fd(1));

        vfs.close(a).unwrap();
        let c = vfs.create("/c").unwrap();
        assert_eq!(c, Fd(0));
    }

    #[test]
    fn descriptor_errors() {
        let (mut vfs, _, _) = two_mount_vfs();

        let mut buf = [0u8; 4];
        assert_eq!(vfs.read(Fd(3), &mut buf), Err(KernelError::BadDescriptor));
        assert_eq!(vfs.close(Fd(3)), Err(KernelError::BadDescriptor));

        let fd = vfs.create("/x").unwrap();
        vfs.close(fd).unwrap();
        assert_eq!(vfs.close(fd), Err(KernelError::BadDescriptor));
    }

    #[test]
    fn descriptor_table_exhausts_at_bound() {
        let (mut vfs, _, _) = two_mount_vfs();

        vfs.create("/f").unwrap();
        for _ in 0..MAX_FD - 1 {
            vfs.open("/f").unwrap();
        }
        assert_eq!(vfs.open("/f").err(), Some(KernelError::Exhausted));
    }

    #[test]
    fn mkdir_read_dir_unlink_through_mounts() {
        let (mut vfs, _, _) = two_mount_vfs();

        vfs.mkdir("/tmp/d").unwrap();
        vfs.create("/tmp/d/f").unwrap();

        let mut out = [Dirent::empty(); 4];
        let n = vfs.read_dir("/tmp/d", &mut out).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].name(), "f");
        assert_eq!(out[0].kind, DirentKind::File);

        vfs.unlink("/tmp/d/f").unwrap();
        assert_eq!(vfs.read_dir("/tmp/d", &mut out).unwrap(), 0);
    }

    #[test]
    fn remove_recursive_forwards_to_backend() {
        let (mut vfs, _, _) = two_mount_vfs();

        vfs.mkdir("/tmp/d").unwrap();
        vfs.create("/tmp/d/f").unwrap();
        vfs.remove_recursive("/tmp/d").unwrap();
        assert_eq!(
            vfs.read_dir("/tmp/d", &mut [Dirent::empty(); 1]).err(),
            Some(KernelError::NotFound)
        );
    }

    #[test]
    fn duplicate_mount_paths_are_rejected() {
        let fs = leaked_ramfs();
        let mut vfs = Vfs::new();
        vfs.mount("/x", fs).unwrap();
        assert_eq!(vfs.mount("/x", fs), Err(KernelError::AlreadyExists));
    }

    #[test]
    fn mount_table_exhausts_at_bound() {
        let fs = leaked_ramfs();
        let mut vfs = Vfs::new();
        let names = ["/m0", "/m1", "/m2", "/m3", "/m4", "/m5", "/m6", "/m7"];
        for name in names {
            vfs.mount(name, fs).unwrap();
        }
        assert_eq!(vfs.mount("/m8", fs), Err(KernelError::Exhausted));
    }

    #[test]
    fn registry_lookup_by_tag() {
        let (vfs, _, _) = two_mount_vfs();
        assert!(vfs.find_type("ramfs").is_some());
        assert!(vfs.find_type("fat32").is_none());
    }

    #[test]
    fn mounts_carry_their_superblocks() {
        let (vfs, _, _) = two_mount_vfs();
        let mut points = vfs.mount_points();
        let (path, sb) = points.next().unwrap();
        assert_eq!(path, "/");
        assert_eq!(sb.magic, crate::fs::ramfs::RAMFS_MAGIC);
    }
}
