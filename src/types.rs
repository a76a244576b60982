//! Common types used across the kernel
//!
//! This module defines shared types to avoid circular dependencies.

/// Maximum length of any kernel path buffer.
pub const MAX_PATH: usize = 256;

/// Bounded path string used by the VFS, namespaces, and process CWDs.
pub type PathBuf = heapless::String<MAX_PATH>;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl Pid {
    /// Pid 0 is never allocated; it names "no process" (e.g. no parent).
    pub const NONE: Pid = Pid(0);
}

/// File descriptor: small non-negative index into the global FD table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(pub usize);

impl Fd {
    /// Convert the wire representation; negative values are not descriptors.
    pub fn from_raw(raw: i32) -> Option<Self> {
        if raw < 0 {
            None
        } else {
            Some(Fd(raw as usize))
        }
    }
}

/// Recoverable kernel errors
///
/// Handlers map all of these to `-1` at the supervisor-call boundary; the
/// kinds exist so internal callers can react (and log) precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Missing or malformed argument (NULL path, bad pointer, empty prefix)
    InvalidArgument,
    /// Message type not in the dispatch table
    UnknownMessage,
    /// File descriptor out of range or not open
    BadDescriptor,
    /// A bounded kernel table is full
    Exhausted,
    /// Path does not name an existing object
    NotFound,
    /// Path already names an object
    AlreadyExists,
    /// Operation requires a directory
    NotADirectory,
    /// Operation requires a file
    IsADirectory,
    /// Caller-supplied buffer cannot hold the result
    BufferTooSmall,
    /// Backend does not implement the operation
    Unsupported,
    /// Block device absent or not initialized
    NoDevice,
    /// Backend I/O failure (short write, transfer error)
    Io,
}
