//! erebos - a small AArch64 microkernel with a Plan 9 flavor
//!
//! Traps from EL0 become typed messages, messages drive kernel objects
//! (files, directories, processes, per-process namespace bindings), and
//! replies flow back through the same record. Runs on the QEMU virt
//! machine; the logic builds and tests on a hosted target with the
//! hardware paths compiled out.

#![no_std]
// Kernel types have specialized initialization that doesn't fit Default.
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod arch;
pub mod console;
pub mod dispatch;
pub mod drivers;
pub mod fs;
pub mod mem;
pub mod message;
pub mod namespace;
pub mod panic;
pub mod process;
pub mod trap;
pub mod types;

/// Kernel name
pub const NAME: &str = "erebos";
/// Kernel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
