//! AArch64 exception entry and context plumbing
//!
//! The vector table saves the trapping process's registers into a
//! [`TrapFrame`] on the kernel stack and calls into the portable gateway
//! (`crate::trap`). On the way out the frame is reloaded and `eret`
//! resumes EL0. Cooperative switches swap per-process kernel stacks via
//! `cpu_switch`; a fresh process starts on a stack whose first
//! continuation erets into its saved user context.
//!
//! When a user program executes `svc #0`:
//! - the exception is taken to EL1 at `vectors + 0x400` (sync, lower EL)
//! - ELR_EL1 holds the instruction after the `svc`
//! - SPSR_EL1 holds the EL0 PSTATE
//!
//! Arguments arrive in x0..x2, the call number in x8, the result leaves
//! in x0.

use crate::process::{self, Context, Process, KSTACK_SIZE};
use crate::trap;

/// Registers captured on exception entry; layout is shared with the
/// assembly in `vectors.s`-style blocks below.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    /// x0..x30 at trap time
    pub regs: [u64; 31],
    pub sp_el0: u64,
    pub elr: u64,
    pub spsr: u64,
}

#[cfg(not(test))]
core::arch::global_asm!(
    r#"
    .section .text
    .align 11
    .global exception_vectors
exception_vectors:
    // Current EL with SP_EL0
    .align 7
    b vector_hang
    .align 7
    b vector_hang
    .align 7
    b vector_hang
    .align 7
    b vector_hang

    // Current EL with SP_ELx
    .align 7
    b vector_hang
    .align 7
    b vector_hang
    .align 7
    b vector_hang
    .align 7
    b vector_hang

    // Lower EL, AArch64 (syscalls land here)
    .align 7
    b el0_sync_entry
    .align 7
    b vector_hang
    .align 7
    b vector_hang
    .align 7
    b vector_hang

    // Lower EL, AArch32 (unsupported)
    .align 7
    b vector_hang
    .align 7
    b vector_hang
    .align 7
    b vector_hang
    .align 7
    b vector_hang

vector_hang:
    wfe
    b vector_hang

el0_sync_entry:
    sub sp, sp, #272
    stp x0, x1, [sp, #0]
    stp x2, x3, [sp, #16]
    stp x4, x5, [sp, #32]
    stp x6, x7, [sp, #48]
    stp x8, x9, [sp, #64]
    stp x10, x11, [sp, #80]
    stp x12, x13, [sp, #96]
    stp x14, x15, [sp, #112]
    stp x16, x17, [sp, #128]
    stp x18, x19, [sp, #144]
    stp x20, x21, [sp, #160]
    stp x22, x23, [sp, #176]
    stp x24, x25, [sp, #192]
    stp x26, x27, [sp, #208]
    stp x28, x29, [sp, #224]
    str x30, [sp, #240]
    mrs x0, sp_el0
    str x0, [sp, #248]
    mrs x0, elr_el1
    str x0, [sp, #256]
    mrs x0, spsr_el1
    str x0, [sp, #264]

    mov x0, sp
    bl el0_sync_rust

    ldr x0, [sp, #264]
    msr spsr_el1, x0
    ldr x0, [sp, #256]
    msr elr_el1, x0
    ldr x0, [sp, #248]
    msr sp_el0, x0
    ldr x30, [sp, #240]
    ldp x28, x29, [sp, #224]
    ldp x26, x27, [sp, #208]
    ldp x24, x25, [sp, #192]
    ldp x22, x23, [sp, #176]
    ldp x20, x21, [sp, #160]
    ldp x18, x19, [sp, #144]
    ldp x16, x17, [sp, #128]
    ldp x14, x15, [sp, #112]
    ldp x12, x13, [sp, #96]
    ldp x10, x11, [sp, #80]
    ldp x8, x9, [sp, #64]
    ldp x6, x7, [sp, #48]
    ldp x4, x5, [sp, #32]
    ldp x2, x3, [sp, #16]
    ldp x0, x1, [sp, #0]
    add sp, sp, #272
    eret

    // cpu_switch(prev_sp: *mut u64 in x0, next_sp: u64 in x1)
    // Saves the callee-saved continuation on the current kernel stack,
    // parks sp in *prev_sp, and resumes from next_sp.
    .global cpu_switch
cpu_switch:
    stp x29, x30, [sp, #-96]!
    stp x27, x28, [sp, #16]
    stp x25, x26, [sp, #32]
    stp x23, x24, [sp, #48]
    stp x21, x22, [sp, #64]
    stp x19, x20, [sp, #80]
    mov x9, sp
    str x9, [x0]
    mov sp, x1
    ldp x19, x20, [sp, #80]
    ldp x21, x22, [sp, #64]
    ldp x23, x24, [sp, #48]
    ldp x25, x26, [sp, #32]
    ldp x27, x28, [sp, #16]
    ldp x29, x30, [sp], #96
    ret

    // user_eret(ctx: *const Context in x0) -> !
    // Reloads the full user register file from a Context and erets.
    .global user_eret
user_eret:
    ldr x1, [x0]
    msr elr_el1, x1
    ldr x1, [x0, #8]
    msr sp_el0, x1
    msr spsr_el1, xzr
    add x0, x0, #16
    ldp x2, x3, [x0, #16]
    ldp x4, x5, [x0, #32]
    ldp x6, x7, [x0, #48]
    ldp x8, x9, [x0, #64]
    ldp x10, x11, [x0, #80]
    ldp x12, x13, [x0, #96]
    ldp x14, x15, [x0, #112]
    ldp x16, x17, [x0, #128]
    ldp x18, x19, [x0, #144]
    ldp x20, x21, [x0, #160]
    ldp x22, x23, [x0, #176]
    ldp x24, x25, [x0, #192]
    ldp x26, x27, [x0, #208]
    ldp x28, x29, [x0, #224]
    ldr x30, [x0, #240]
    ldp x0, x1, [x0]
    eret
"#
);

#[cfg(not(test))]
extern "C" {
    /// Swap kernel continuations; returns when this process is resumed.
    pub fn cpu_switch(prev_sp: *mut u64, next_sp: u64);
    fn user_eret(ctx: *const Context) -> !;
    static exception_vectors: [u8; 0];
}

/// Point VBAR_EL1 at our vector table.
///
/// # Safety
///
/// Must run at EL1 before the first user process is entered.
#[cfg(not(test))]
pub unsafe fn install_vectors() {
    let base = core::ptr::addr_of!(exception_vectors) as u64;
    core::arch::asm!("msr vbar_el1, {}", in(reg) base);
    core::arch::asm!("isb");
}

#[cfg(not(test))]
fn read_esr() -> u64 {
    let esr: u64;
    unsafe { core::arch::asm!("mrs {}, esr_el1", out(reg) esr) };
    esr
}

#[cfg(not(test))]
fn read_far() -> u64 {
    let far: u64;
    unsafe { core::arch::asm!("mrs {}, far_el1", out(reg) far) };
    far
}

/// Synchronous exception handler for EL0, called from the vector stub.
#[cfg(not(test))]
#[no_mangle]
extern "C" fn el0_sync_rust(frame: &mut TrapFrame) {
    let esr = read_esr();
    let far = read_far();

    // Snapshot trap-time registers so fork and exec see the caller's
    // context through the process record.
    if let Some(cur) = process::table().and_then(|t| t.current()) {
        cur.ctx.pc = frame.elr;
        cur.ctx.sp = frame.sp_el0;
        cur.ctx.regs = frame.regs;
    }

    let word = trap::handle_sync_exception(
        esr,
        far,
        frame.elr,
        frame.regs[0],
        frame.regs[1],
        frame.regs[2],
        frame.regs[8],
    );
    if word & trap::HALT != 0 {
        crate::arch::halt();
    }

    match process::table().and_then(|t| t.current()) {
        Some(cur) if cur.ctx.pc != frame.elr => {
            // The handler redirected this return (exec, or a switch to a
            // different process): reload the whole frame from the record.
            frame.regs = cur.ctx.regs;
            frame.sp_el0 = cur.ctx.sp;
            frame.elr = cur.ctx.pc;
        }
        // Sign-extend the 32-bit result into x0.
        _ => frame.regs[0] = (word as i32) as i64 as u64,
    }
}

/// First code a fresh process runs on its own kernel stack: drop straight
/// into its saved user context.
#[cfg(not(test))]
extern "C" fn process_entry() -> ! {
    let ctx = process::table()
        .and_then(|t| t.current())
        .map(|cur| cur.ctx)
        .unwrap_or_else(Context::new);
    unsafe { user_eret(&ctx) }
}

/// Give a new process a kernel stack whose continuation starts at
/// [`process_entry`].
#[cfg(not(test))]
pub fn prepare_kernel_stack(proc: &mut Process) {
    use alloc::boxed::Box;

    let mut stack = Box::new([0u8; KSTACK_SIZE]);
    let top = (stack.as_mut_ptr() as usize + KSTACK_SIZE) & !15;
    let frame = top - 96;
    unsafe {
        // cpu_switch frame: x29 at +0, x30 (resume address) at +8.
        core::ptr::write(frame as *mut u64, 0);
        core::ptr::write((frame + 8) as *mut u64, process_entry as usize as u64);
    }
    proc.kernel_sp = frame as u64;
    proc.kstack = Some(stack);
}

/// Drop to EL0 for the first time.
///
/// # Safety
///
/// `pc`/`sp` must point into the mapped user region and the vector table
/// must already be installed.
#[cfg(not(test))]
pub unsafe fn enter_usermode(pc: u64, sp: u64) -> ! {
    let mut ctx = Context::new();
    ctx.pc = pc;
    ctx.sp = sp;
    user_eret(&ctx)
}
