//! Message dispatcher
//!
//! `send_message` realizes the semantics of every message type: it routes a
//! typed [`Message`] to the filesystem, process, namespace, or console
//! subsystem and writes the reply fields in place. Responses are
//! synchronous; the call returns only after the handler has completed.
//! Recoverable errors surface as -1, with reply fields left untouched
//! except for explicit status slots.

use alloc::vec::Vec;

use crate::fs::vfs::{self, Vfs};
use crate::fs::Dirent;
use crate::message::{Message, MessageFlags, MessageType};
use crate::namespace::BindMode;
use crate::process::{self, USER_BASE, USER_STACK_TOP};
use crate::types::{Fd, KernelError, PathBuf, Pid};

/// Kernel-side staging buffer for READ.
const READ_CHUNK: usize = 512;
/// Streaming chunk for COPY and MOVE.
const COPY_CHUNK: usize = 1024;
/// Kernel-side dirent staging bound.
const DIRENT_SCRATCH: usize = 32;

/// Execute one message and return its integer result.
pub fn send_message(msg: &mut Message) -> i64 {
    let Some(msg_type) = msg.message_type() else {
        crate::println!("dispatch: unknown message type {}", msg.msg_type);
        return -1;
    };

    match msg_type {
        MessageType::Open => handle_open(msg),
        MessageType::Read => handle_read(msg),
        MessageType::Write => handle_write(msg),
        MessageType::Close => handle_close(msg),
        MessageType::Create => handle_create(msg),
        MessageType::Mkdir => handle_mkdir(msg),
        MessageType::ReadDir => handle_read_dir(msg),
        MessageType::Remove => handle_remove(msg),
        MessageType::Copy => handle_copy(msg),
        MessageType::Move => handle_move(msg),
        MessageType::Getcwd => handle_getcwd(msg),
        MessageType::Chdir => handle_chdir(msg),
        MessageType::Bind => handle_bind(msg),
        MessageType::Unbind => handle_unbind(msg),
        MessageType::Fork => handle_fork(msg),
        MessageType::Exec => handle_exec(msg),
        MessageType::Wait => handle_wait(msg),
        // Reserved in this revision.
        MessageType::Pipe => 0,
        MessageType::Putc => handle_putc(msg),
        MessageType::Getc => handle_getc(msg),
        MessageType::Puts => handle_puts(msg),
        MessageType::None | MessageType::Stat | MessageType::Mount => {
            crate::println!("dispatch: no handler for type {}", msg.msg_type);
            -1
        }
    }
}

/// Pop a message from the caller's queue.
///
/// An empty queue blocks (yielding to the scheduler) unless `NONBLOCK` is
/// set; a blocked receive is released only by a matching enqueue.
pub fn receive_message(msg: &mut Message) -> i64 {
    let Some(table) = process::table() else {
        return -1;
    };
    let pid = table.current_pid();
    let nonblock = msg.flags().contains(MessageFlags::NONBLOCK);

    match table.current() {
        Some(cur) => {
            if let Some(delivered) = cur.queue.pop() {
                *msg = delivered;
                return 0;
            }
            if nonblock {
                return -1;
            }
            cur.msg_blocked = true;
            cur.state = crate::process::ProcessState::Blocked;
        }
        None => return -1,
    }

    table.schedule();

    // Back on the CPU (or nothing else was runnable): rescan once.
    if let Some(proc) = table.find_mut(pid) {
        if let Some(delivered) = proc.queue.pop() {
            *msg = delivered;
            return 0;
        }
    }
    -1
}

/// Deliver a message into another process's queue.
pub fn queue_message(pid: Pid, msg: &Message) -> i64 {
    let Some(table) = process::table() else {
        return -1;
    };
    match table.enqueue_message(pid, msg) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Absolutize against the caller's CWD, normalize, then apply the caller's
/// namespace bindings. Every path-bearing handler goes through here before
/// mount lookup.
fn resolve_request_path(path: &str) -> PathBuf {
    match process::table().and_then(|t| t.current()) {
        Some(cur) => {
            let abs = vfs::absolute_path(&cur.cwd, path);
            cur.namespace.resolve(&abs)
        }
        None => vfs::absolute_path("/", path),
    }
}

fn handle_open(msg: &mut Message) -> i64 {
    let Some(path) = msg.path_str() else {
        return -1;
    };
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let resolved = resolve_request_path(path);
    match vfs.open(&resolved) {
        Ok(fd) => {
            msg.fd = fd.0 as i32;
            fd.0 as i64
        }
        Err(_) => -1,
    }
}

fn handle_read(msg: &mut Message) -> i64 {
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let Some(fd) = Fd::from_raw(msg.fd) else {
        return -1;
    };

    let mut chunk = [0u8; READ_CHUNK];
    let mut total = 0usize;
    while total < msg.size {
        let want = READ_CHUNK.min(msg.size - total);
        match vfs.read(fd, &mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => {
                if !msg.data.is_null() {
                    unsafe {
                        core::ptr::copy_nonoverlapping(chunk.as_ptr(), msg.data.add(total), n);
                    }
                }
                total += n;
            }
            Err(_) => {
                if total == 0 {
                    return -1;
                }
                break;
            }
        }
    }

    msg.size = total;
    total as i64
}

fn handle_write(msg: &mut Message) -> i64 {
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let Some(fd) = Fd::from_raw(msg.fd) else {
        return -1;
    };
    if msg.data.is_null() && msg.size > 0 {
        return -1;
    }

    let buf = if msg.size == 0 {
        &[][..]
    } else {
        unsafe { core::slice::from_raw_parts(msg.data as *const u8, msg.size) }
    };
    match vfs.write(fd, buf) {
        Ok(n) => n as i64,
        Err(_) => -1,
    }
}

fn handle_close(msg: &mut Message) -> i64 {
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let Some(fd) = Fd::from_raw(msg.fd) else {
        return -1;
    };
    match vfs.close(fd) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Touch semantics: create, record the descriptor, close it right away.
fn handle_create(msg: &mut Message) -> i64 {
    let Some(path) = msg.path_str() else {
        return -1;
    };
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let resolved = resolve_request_path(path);
    match vfs.create(&resolved) {
        Ok(fd) => {
            msg.fd = fd.0 as i32;
            let _ = vfs.close(fd);
            0
        }
        Err(_) => -1,
    }
}

fn handle_mkdir(msg: &mut Message) -> i64 {
    let Some(path) = msg.path_str() else {
        return -1;
    };
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let resolved = resolve_request_path(path);
    match vfs.mkdir(&resolved) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

fn handle_read_dir(msg: &mut Message) -> i64 {
    let Some(path) = msg.path_str() else {
        return -1;
    };
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let resolved = resolve_request_path(path);

    let mut scratch = [Dirent::empty(); DIRENT_SCRATCH];
    let count = match vfs.read_dir(&resolved, &mut scratch) {
        Ok(n) => n,
        Err(_) => return -1,
    };
    if count == 0 {
        msg.dirent_count = 0;
        return 0;
    }

    // A too-small buffer is an error, not a silent truncation.
    let capacity = msg.size / core::mem::size_of::<Dirent>();
    if msg.data.is_null() || capacity < count {
        msg.dirent_count = 0;
        return -1;
    }

    let dst = msg.data as *mut Dirent;
    for (i, entry) in scratch.iter().take(count).enumerate() {
        unsafe { core::ptr::write_unaligned(dst.add(i), *entry) };
    }
    msg.dirent_count = count;
    count as i64
}

fn handle_remove(msg: &mut Message) -> i64 {
    let Some(path) = msg.path_str() else {
        return -1;
    };
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let resolved = resolve_request_path(path);
    match vfs.unlink(&resolved) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Stream `src` into a freshly created `dst`; on any error the destination
/// is unlinked so a failed copy leaves no partial file behind.
fn copy_file(vfs: &mut Vfs, src: &str, dst: &str) -> Result<(), KernelError> {
    let src_fd = vfs.open(src)?;
    let dst_fd = match vfs.create(dst) {
        Ok(fd) => fd,
        Err(e) => {
            let _ = vfs.close(src_fd);
            return Err(e);
        }
    };

    let mut buf = [0u8; COPY_CHUNK];
    loop {
        match vfs.read(src_fd, &mut buf) {
            Ok(0) => break,
            Ok(n) => match vfs.write(dst_fd, &buf[..n]) {
                Ok(written) if written == n => {}
                _ => {
                    let _ = vfs.close(src_fd);
                    let _ = vfs.close(dst_fd);
                    let _ = vfs.unlink(dst);
                    return Err(KernelError::Io);
                }
            },
            Err(e) => {
                let _ = vfs.close(src_fd);
                let _ = vfs.close(dst_fd);
                let _ = vfs.unlink(dst);
                return Err(e);
            }
        }
    }

    let _ = vfs.close(src_fd);
    let _ = vfs.close(dst_fd);
    Ok(())
}

fn handle_copy(msg: &mut Message) -> i64 {
    let (Some(src), Some(dst)) = (msg.path_str(), msg.data_str()) else {
        return -1;
    };
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let src = resolve_request_path(src);
    let dst = resolve_request_path(dst);
    match copy_file(vfs, &src, &dst) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// No backend rename yet: MOVE is COPY plus REMOVE of the source. If the
/// source cannot be removed the destination is rolled back.
fn handle_move(msg: &mut Message) -> i64 {
    let (Some(src), Some(dst)) = (msg.path_str(), msg.data_str()) else {
        return -1;
    };
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let src = resolve_request_path(src);
    let dst = resolve_request_path(dst);

    if copy_file(vfs, &src, &dst).is_err() {
        return -1;
    }
    if vfs.unlink(&src).is_err() {
        let _ = vfs.unlink(&dst);
        return -1;
    }
    0
}

fn handle_getcwd(msg: &mut Message) -> i64 {
    let Some(cur) = process::table().and_then(|t| t.current()) else {
        return -1;
    };
    if msg.data.is_null() || msg.size == 0 {
        return -1;
    }

    let len = cur.cwd.len();
    if len >= msg.size {
        return -1;
    }
    unsafe {
        core::ptr::copy_nonoverlapping(cur.cwd.as_ptr(), msg.data, len);
        msg.data.add(len).write(0);
    }
    msg.size = len;
    0
}

fn handle_chdir(msg: &mut Message) -> i64 {
    msg.status = -1;
    let Some(path) = msg.path_str() else {
        return -1;
    };
    let Some(cur) = process::table().and_then(|t| t.current()) else {
        return -1;
    };
    let Some(vfs) = vfs::get() else {
        return -1;
    };

    let target = vfs::absolute_path(&cur.cwd, path);
    let resolved = cur.namespace.resolve(&target);

    // Accept only a target that reads as a directory.
    let mut scratch = [Dirent::empty(); DIRENT_SCRATCH];
    if vfs.read_dir(&resolved, &mut scratch).is_ok() {
        cur.cwd = target;
        msg.status = 0;
    }
    msg.status as i64
}

/// Install a REPLACE binding: `target` shows `source`'s contents.
fn handle_bind(msg: &mut Message) -> i64 {
    let (Some(source), Some(target)) = (msg.path_str(), msg.data_str()) else {
        return -1;
    };
    let Some(cur) = process::table().and_then(|t| t.current()) else {
        return -1;
    };

    let source = vfs::absolute_path(&cur.cwd, source);
    let target = vfs::absolute_path(&cur.cwd, target);
    match cur.namespace.bind(&target, &source, BindMode::Replace) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

fn handle_unbind(msg: &mut Message) -> i64 {
    let Some(path) = msg.path_str() else {
        return -1;
    };
    let Some(cur) = process::table().and_then(|t| t.current()) else {
        return -1;
    };

    let prefix = vfs::absolute_path(&cur.cwd, path);
    if cur.namespace.unbind(&prefix) > 0 {
        0
    } else {
        -1
    }
}

fn handle_fork(msg: &mut Message) -> i64 {
    let Some(table) = process::table() else {
        return -1;
    };
    match table.fork_current() {
        Ok(pid) => {
            // Parent reply carries the child id; the child's return
            // register already reads zero.
            msg.pid = pid.0;
            0
        }
        Err(_) => -1,
    }
}

fn handle_exec(msg: &mut Message) -> i64 {
    let Some(path) = msg.path_str() else {
        return -1;
    };
    let Some(vfs) = vfs::get() else {
        return -1;
    };
    let resolved = resolve_request_path(path);

    // Pull the whole image through the VFS before touching the caller, so
    // a missing program fails the exec with the old image intact.
    let fd = match vfs.open(&resolved) {
        Ok(fd) => fd,
        Err(_) => return -1,
    };
    let mut image: Vec<u8> = Vec::new();
    let mut chunk = [0u8; COPY_CHUNK];
    loop {
        match vfs.read(fd, &mut chunk) {
            Ok(0) => break,
            Ok(n) => image.extend_from_slice(&chunk[..n]),
            Err(_) => {
                let _ = vfs.close(fd);
                return -1;
            }
        }
    }
    let _ = vfs.close(fd);

    #[cfg(all(target_arch = "aarch64", not(test)))]
    unsafe {
        // Single user region: the image runs in place at its base.
        let n = image.len().min(process::USER_REGION_SIZE);
        core::ptr::copy_nonoverlapping(image.as_ptr(), USER_BASE as *mut u8, n);
    }
    crate::println!("exec: {} ({} bytes)", resolved, image.len());

    let entry = if msg.entry != 0 {
        msg.entry as u64
    } else {
        USER_BASE as u64
    };
    let Some(table) = process::table() else {
        return -1;
    };
    match table.exec_current(entry, USER_STACK_TOP as u64, msg.argv as u64) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

fn handle_wait(msg: &mut Message) -> i64 {
    let Some(table) = process::table() else {
        return -1;
    };
    let pid = table.current_pid();

    if let Some((_, status)) = table.harvest_zombie(pid) {
        msg.status = status;
        return 0;
    }

    // No zombie child yet: block and yield, rescan when resumed.
    table.block_current();
    table.schedule();

    if let Some((_, status)) = table.harvest_zombie(pid) {
        msg.status = status;
        return 0;
    }
    -1
}

fn handle_putc(msg: &mut Message) -> i64 {
    crate::console::putc(msg.character);
    0
}

fn handle_getc(msg: &mut Message) -> i64 {
    match crate::console::getc() {
        Some(c) => {
            msg.character = c;
            c as i64
        }
        None => -1,
    }
}

fn handle_puts(msg: &mut Message) -> i64 {
    let Some(s) = msg.string_str() else {
        return -1;
    };
    crate::console::puts(s);
    0
}
