//! Kernel messages
//!
//! Every request a user program makes of the kernel is one `Message`: a wide
//! record with a type discriminant and the union of all argument and reply
//! fields. The record layout is part of the user ABI; user binaries encode
//! the type ordinals, so they are fixed here with explicit values.
//!
//! Replies travel in the same record: handlers mutate the reply fields in
//! place and the dispatcher's integer result goes back in the trap return.

use bitflags::bitflags;

use crate::fs::Dirent;
use crate::types::KernelError;

/// Messages per process queue.
pub const MAX_MESSAGES: usize = 32;

/// Longest C string the kernel will read from user memory.
const MAX_USER_STR: usize = 1024;

/// Message type discriminants (stable wire ordinals)
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    None = 0,
    Open = 1,
    Read = 2,
    Write = 3,
    Close = 4,
    Stat = 5,
    Bind = 6,
    Mount = 7,
    Fork = 8,
    Exec = 9,
    Wait = 10,
    Pipe = 11,
    ReadDir = 12,
    Create = 13,
    Mkdir = 14,
    Getcwd = 15,
    Chdir = 16,
    Copy = 17,
    Remove = 18,
    Move = 19,
    Unbind = 20,
    Putc = 21,
    Getc = 22,
    Puts = 23,
}

impl MessageType {
    /// Decode a wire ordinal.
    pub fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => MessageType::None,
            1 => MessageType::Open,
            2 => MessageType::Read,
            3 => MessageType::Write,
            4 => MessageType::Close,
            5 => MessageType::Stat,
            6 => MessageType::Bind,
            7 => MessageType::Mount,
            8 => MessageType::Fork,
            9 => MessageType::Exec,
            10 => MessageType::Wait,
            11 => MessageType::Pipe,
            12 => MessageType::ReadDir,
            13 => MessageType::Create,
            14 => MessageType::Mkdir,
            15 => MessageType::Getcwd,
            16 => MessageType::Chdir,
            17 => MessageType::Copy,
            18 => MessageType::Remove,
            19 => MessageType::Move,
            20 => MessageType::Unbind,
            21 => MessageType::Putc,
            22 => MessageType::Getc,
            23 => MessageType::Puts,
            _ => return None,
        })
    }
}

bitflags! {
    /// Message flags word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageFlags: u32 {
        /// Receive does not block on an empty queue
        const NONBLOCK = 1 << 0;
    }
}

/// The universal request/reply record
///
/// Pointer fields refer to caller memory; the kernel only dereferences them
/// through the bounded accessors below. `data` buffers must either be NULL
/// or point to at least `size` bytes.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Message {
    pub msg_type: u64,
    pub path: *const u8,
    pub argv: *const *const u8,
    pub data: *mut u8,
    pub size: usize,
    pub flags: u32,
    pub fd: i32,
    pub pid: i32,
    pub status: i32,
    pub entry: usize,
    pub dirents: *mut Dirent,
    pub dirent_count: usize,
    pub character: u8,
    pub string: *const u8,
}

impl Message {
    /// A zeroed message of the given type.
    pub const fn new(msg_type: MessageType) -> Self {
        Message {
            msg_type: msg_type as u64,
            path: core::ptr::null(),
            argv: core::ptr::null(),
            data: core::ptr::null_mut(),
            size: 0,
            flags: 0,
            fd: 0,
            pid: 0,
            status: 0,
            entry: 0,
            dirents: core::ptr::null_mut(),
            dirent_count: 0,
            character: 0,
            string: core::ptr::null(),
        }
    }

    pub const EMPTY: Message = Message::new(MessageType::None);

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_raw(self.msg_type)
    }

    pub fn flags(&self) -> MessageFlags {
        MessageFlags::from_bits_truncate(self.flags)
    }

    /// The request path, if present and valid UTF-8.
    pub fn path_str(&self) -> Option<&str> {
        cstr_to_str(self.path)
    }

    /// The console string argument (PUTS).
    pub fn string_str(&self) -> Option<&str> {
        cstr_to_str(self.string)
    }

    /// The `data` field read as a second path (COPY/MOVE destination,
    /// BIND target).
    pub fn data_str(&self) -> Option<&str> {
        cstr_to_str(self.data as *const u8)
    }
}

/// Read a NUL-terminated user string, bounded at [`MAX_USER_STR`].
fn cstr_to_str<'a>(ptr: *const u8) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0;
    while len < MAX_USER_STR {
        if unsafe { ptr.add(len).read() } == 0 {
            let bytes = unsafe { core::slice::from_raw_parts(ptr, len) };
            return core::str::from_utf8(bytes).ok();
        }
        len += 1;
    }
    None
}

/// Bounded per-process message ring
///
/// FIFO between enqueue and dequeue; `0 <= count <= MAX_MESSAGES` always.
pub struct MessageQueue {
    messages: [Message; MAX_MESSAGES],
    head: usize,
    tail: usize,
    count: usize,
}

impl MessageQueue {
    pub const fn new() -> Self {
        MessageQueue {
            messages: [Message::EMPTY; MAX_MESSAGES],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Enqueue at the tail; fails when the ring is full.
    pub fn push(&mut self, msg: &Message) -> Result<(), KernelError> {
        if self.count >= MAX_MESSAGES {
            return Err(KernelError::Exhausted);
        }
        self.messages[self.tail] = *msg;
        self.tail = (self.tail + 1) % MAX_MESSAGES;
        self.count += 1;
        Ok(())
    }

    /// Dequeue from the head.
    pub fn pop(&mut self) -> Option<Message> {
        if self.count == 0 {
            return None;
        }
        let msg = self.messages[self.head];
        self.head = (self.head + 1) % MAX_MESSAGES;
        self.count -= 1;
        Some(msg)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= MAX_MESSAGES
    }
}
