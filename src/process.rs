//! Processes and the cooperative scheduler
//!
//! One process is RUNNING at any instant. Handlers run to completion on the
//! current process's behalf; the only suspension points are a blocking
//! receive on an empty queue and WAIT with no zombie child. Both mark the
//! caller BLOCKED and hand the CPU to the scheduler, which picks any READY
//! process. There is no preemption; timer-driven slicing is a future
//! extension.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::message::{Message, MessageQueue};
use crate::namespace::Namespace;
use crate::types::{KernelError, Pid};

/// Process table bound.
pub const MAX_PROCESSES: usize = 16;

/// Base of the single user region.
pub const USER_BASE: usize = 0x8000_0000;
/// User region size; the stack grows down from the top.
pub const USER_REGION_SIZE: usize = 0x10_0000;
/// Initial user stack pointer.
pub const USER_STACK_TOP: usize = USER_BASE + USER_REGION_SIZE;

/// Per-process kernel stack (hardware builds).
pub const KSTACK_SIZE: usize = 16 * 1024;

/// Process lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// Saved user register context
///
/// `pc`/`sp` seed the exception return; `regs` holds x0..x30 at trap time.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub pc: u64,
    pub sp: u64,
    pub regs: [u64; 31],
}

impl Context {
    pub const fn new() -> Self {
        Context {
            pc: 0,
            sp: 0,
            regs: [0; 31],
        }
    }
}

/// One process
pub struct Process {
    pub pid: Pid,
    /// Parent by id, not pointer, so the table stays cycle-free.
    pub parent: Pid,
    pub state: ProcessState,
    pub ctx: Context,
    pub cwd: crate::types::PathBuf,
    pub queue: MessageQueue,
    /// Set while blocked in a message receive; cleared by an enqueue.
    pub msg_blocked: bool,
    pub exit_status: i32,
    pub namespace: Namespace,
    /// Saved kernel continuation for the cooperative switch.
    pub kernel_sp: u64,
    /// Kernel stack backing the continuation (hardware builds).
    pub kstack: Option<Box<[u8; KSTACK_SIZE]>>,
}

impl Process {
    fn new(pid: Pid, parent: Pid) -> Self {
        let mut cwd = crate::types::PathBuf::new();
        let _ = cwd.push('/');
        Process {
            pid,
            parent,
            state: ProcessState::Ready,
            ctx: Context::new(),
            cwd,
            queue: MessageQueue::new(),
            msg_blocked: false,
            exit_status: 0,
            namespace: Namespace::new(),
            kernel_sp: 0,
            kstack: None,
        }
    }
}

/// The process table
pub struct ProcessTable {
    procs: Vec<Process>,
    current: Pid,
    next_pid: i32,
}

impl ProcessTable {
    pub const fn new() -> Self {
        ProcessTable {
            procs: Vec::new(),
            current: Pid::NONE,
            next_pid: 1,
        }
    }

    fn alloc_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Create the first process and make it current.
    pub fn bootstrap(&mut self, entry: u64, sp: u64) -> Pid {
        let pid = self.alloc_pid();
        let mut proc = Process::new(pid, Pid::NONE);
        proc.state = ProcessState::Running;
        proc.ctx.pc = entry;
        proc.ctx.sp = sp;
        self.procs.push(proc);
        self.current = pid;
        pid
    }

    pub fn current_pid(&self) -> Pid {
        self.current
    }

    pub fn find_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.procs.iter_mut().find(|p| p.pid == pid)
    }

    pub fn find(&self, pid: Pid) -> Option<&Process> {
        self.procs.iter().find(|p| p.pid == pid)
    }

    /// The process the kernel is currently working for.
    pub fn current(&mut self) -> Option<&mut Process> {
        let pid = self.current;
        self.find_mut(pid)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Duplicate the calling process.
    ///
    /// The child copies the register context, CWD, and namespace (deep),
    /// gets a fresh empty queue, and observes 0 in its return register.
    /// Open files live in the global FD table and stay shared.
    pub fn fork_current(&mut self) -> Result<Pid, KernelError> {
        if self.procs.len() >= MAX_PROCESSES {
            return Err(KernelError::Exhausted);
        }
        let (parent_pid, ctx, cwd, namespace) = {
            let cur = self.current().ok_or(KernelError::NotFound)?;
            (cur.pid, cur.ctx, cur.cwd.clone(), cur.namespace.clone())
        };

        let pid = self.alloc_pid();
        let mut child = Process::new(pid, parent_pid);
        child.ctx = ctx;
        child.ctx.regs[0] = 0;
        child.cwd = cwd;
        child.namespace = namespace;

        #[cfg(all(target_arch = "aarch64", not(test)))]
        crate::arch::aarch64::prepare_kernel_stack(&mut child);

        self.procs.push(child);
        Ok(pid)
    }

    /// Replace the current image: new entry, fresh stack, argv in x0.
    /// Pid, descriptors, CWD, and namespace are untouched.
    pub fn exec_current(&mut self, entry: u64, sp: u64, argv: u64) -> Result<(), KernelError> {
        let cur = self.current().ok_or(KernelError::NotFound)?;
        cur.ctx = Context::new();
        cur.ctx.pc = entry;
        cur.ctx.sp = sp;
        cur.ctx.regs[0] = argv;
        Ok(())
    }

    /// Terminate the current process; the status waits for the parent.
    pub fn exit_current(&mut self, status: i32) {
        let parent = match self.current() {
            Some(cur) => {
                cur.state = ProcessState::Zombie;
                cur.exit_status = status;
                cur.parent
            }
            None => return,
        };

        // A parent blocked in WAIT (blocked, but not on its queue) becomes
        // runnable now that there is a zombie to harvest.
        if let Some(parent) = self.find_mut(parent) {
            if parent.state == ProcessState::Blocked && !parent.msg_blocked {
                parent.state = ProcessState::Ready;
            }
        }

        self.schedule();
    }

    /// Reap one zombie child of `parent`, if any.
    pub fn harvest_zombie(&mut self, parent: Pid) -> Option<(Pid, i32)> {
        let idx = self
            .procs
            .iter()
            .position(|p| p.parent == parent && p.state == ProcessState::Zombie)?;
        let child = self.procs.remove(idx);
        Some((child.pid, child.exit_status))
    }

    /// Deliver a message to `pid`'s queue, waking a blocked receiver.
    pub fn enqueue_message(&mut self, pid: Pid, msg: &Message) -> Result<(), KernelError> {
        let target = self.find_mut(pid).ok_or(KernelError::NotFound)?;
        target.queue.push(msg)?;
        if target.msg_blocked {
            target.msg_blocked = false;
            target.state = ProcessState::Ready;
        }
        Ok(())
    }

    /// Mark the current process blocked ahead of a yield.
    pub fn block_current(&mut self) {
        if let Some(cur) = self.current() {
            cur.state = ProcessState::Blocked;
        }
    }

    /// Pick any READY process and resume it.
    ///
    /// Round-robin from just past the current slot, so no READY process is
    /// starved while others run. With nothing runnable this returns and
    /// the caller idles.
    pub fn schedule(&mut self) {
        let n = self.procs.len();
        if n == 0 {
            return;
        }
        let cur_pid = self.current;
        let start = self
            .procs
            .iter()
            .position(|p| p.pid == cur_pid)
            .map(|i| i + 1)
            .unwrap_or(0);

        let mut next = None;
        for off in 0..n {
            let i = (start + off) % n;
            if self.procs[i].state == ProcessState::Ready {
                next = Some(i);
                break;
            }
        }
        let Some(next) = next else {
            return;
        };

        self.procs[next].state = ProcessState::Running;
        let prev = self.current;
        self.current = self.procs[next].pid;

        #[cfg(all(target_arch = "aarch64", not(test)))]
        if prev != self.current {
            if let Some(prev_idx) = self.procs.iter().position(|p| p.pid == prev) {
                let prev_sp = core::ptr::addr_of_mut!(self.procs[prev_idx].kernel_sp);
                let next_sp = self.procs[next].kernel_sp;
                unsafe { crate::arch::aarch64::cpu_switch(prev_sp, next_sp) };
            }
        }

        #[cfg(any(not(target_arch = "aarch64"), test))]
        let _ = prev;
    }

    /// Point the table at a specific process (test scaffolding).
    #[cfg(test)]
    pub fn set_current(&mut self, pid: Pid) {
        self.current = pid;
        if let Some(p) = self.find_mut(pid) {
            p.state = ProcessState::Running;
        }
    }
}

// Process-wide table, mutated only from the cooperative kernel context.
static mut PROCESS_TABLE: Option<ProcessTable> = None;

/// Initialize (or reset) the process table.
pub fn init() {
    unsafe {
        PROCESS_TABLE = Some(ProcessTable::new());
    }
}

/// Get the global process table
pub fn table() -> Option<&'static mut ProcessTable> {
    unsafe { (*core::ptr::addr_of_mut!(PROCESS_TABLE)).as_mut() }
}
