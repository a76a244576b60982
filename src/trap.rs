//! Trap gateway
//!
//! The single synchronous-exception path from EL0 into the kernel. A
//! supervisor call becomes a [`Message`] and goes through the dispatcher;
//! anything else is a fault, which is logged and halts the machine. The
//! architecture layer reads the syndrome registers and calls in here; this
//! module is pure logic so it runs on the host too.

use crate::dispatch::send_message;
use crate::message::{Message, MessageType};

/// Supervisor call numbers (register r8)
pub const SYS_PUTC: u64 = 1;
pub const SYS_GETC: u64 = 2;
pub const SYS_PUTS: u64 = 3;
pub const SYS_SEND_MESSAGE: u64 = 4;

/// Gateway return word: bits 31..0 carry the call result, bit 32 signals
/// halt (faults only).
pub const HALT: u64 = 1 << 32;

/// Exception classes of interest (ESR_EL1 bits 31:26)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionClass {
    SvcAarch64,
    InstructionAbortLowerEl,
    InstructionAbortSameEl,
    PcAlignment,
    DataAbortLowerEl,
    DataAbortSameEl,
    SpAlignment,
    Unknown,
}

/// Extract the exception class from a syndrome value.
pub fn exception_class(esr: u64) -> ExceptionClass {
    match (esr >> 26) & 0x3f {
        0x15 => ExceptionClass::SvcAarch64,
        0x20 => ExceptionClass::InstructionAbortLowerEl,
        0x21 => ExceptionClass::InstructionAbortSameEl,
        0x22 => ExceptionClass::PcAlignment,
        0x24 => ExceptionClass::DataAbortLowerEl,
        0x25 => ExceptionClass::DataAbortSameEl,
        0x26 => ExceptionClass::SpAlignment,
        _ => ExceptionClass::Unknown,
    }
}

fn describe(class: ExceptionClass) -> &'static str {
    match class {
        ExceptionClass::SvcAarch64 => "SVC instruction",
        ExceptionClass::InstructionAbortLowerEl => "instruction abort from lower EL",
        ExceptionClass::InstructionAbortSameEl => "instruction abort from same EL",
        ExceptionClass::PcAlignment => "PC alignment fault",
        ExceptionClass::DataAbortLowerEl => "data abort from lower EL",
        ExceptionClass::DataAbortSameEl => "data abort from same EL",
        ExceptionClass::SpAlignment => "SP alignment fault",
        ExceptionClass::Unknown => "unknown class",
    }
}

/// Pack a call result into the low half of the return word.
pub fn return_word(value: i64) -> u64 {
    (value as i32 as u32) as u64
}

/// Classify and handle one synchronous exception.
///
/// `x0..x2` and `x8` are the trapping process's argument registers. On a
/// fault the returned word has the halt bit set and the caller must not
/// resume user code.
pub fn handle_sync_exception(esr: u64, far: u64, elr: u64, x0: u64, x1: u64, x2: u64, x8: u64) -> u64 {
    let class = exception_class(esr);
    if class == ExceptionClass::SvcAarch64 {
        // ELR already points past the SVC instruction, so the return
        // lands on the next instruction with no adjustment here.
        let _ = (x1, x2);
        return syscall(x0, x8);
    }

    report_fault(class, esr, far, elr);
    HALT
}

/// Route a supervisor call by its number in r8.
fn syscall(x0: u64, x8: u64) -> u64 {
    match x8 {
        SYS_PUTC => {
            let mut msg = Message::new(MessageType::Putc);
            msg.character = x0 as u8;
            send_message(&mut msg);
            return_word(0)
        }
        SYS_GETC => {
            let mut msg = Message::new(MessageType::Getc);
            let result = send_message(&mut msg);
            if result >= 0 {
                return_word(msg.character as i64)
            } else {
                return_word(-1)
            }
        }
        SYS_PUTS => {
            let mut msg = Message::new(MessageType::Puts);
            msg.string = x0 as *const u8;
            send_message(&mut msg);
            return_word(0)
        }
        SYS_SEND_MESSAGE => {
            if x0 == 0 {
                return return_word(-1);
            }
            let msg = unsafe { &mut *(x0 as *mut Message) };
            return_word(send_message(msg))
        }
        _ => {
            crate::println!("trap: unknown syscall {}", x8);
            return_word(-1)
        }
    }
}

/// Log a fatal fault before the machine halts.
fn report_fault(class: ExceptionClass, esr: u64, far: u64, elr: u64) {
    crate::println!("\n*** SYNC EXCEPTION ***");
    crate::println!("ESR_EL1: {:#018x} ({})", esr, describe(class));
    crate::println!("ELR_EL1: {:#018x}", elr);
    crate::println!("FAR_EL1: {:#018x}", far);
    crate::println!("System halted due to unhandled exception.");
}
