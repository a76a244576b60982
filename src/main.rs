//! erebos kernel binary entry point

#![no_std]
#![cfg_attr(not(test), no_main)]

#[cfg(not(test))]
use core::panic::PanicInfo;

#[cfg(not(test))]
use erebos::{console, drivers, fs, mem, println, process};

/// Kernel entry point; the boot stub lands here at EL1.
#[cfg(not(test))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    kernel_main()
}

/// Bring the subsystems up in dependency order, then drop to EL0.
#[cfg(not(test))]
fn kernel_main() -> ! {
    console::init();
    mem::init();
    process::init();
    drivers::init();
    if let Err(e) = fs::vfs::init() {
        println!("vfs init failed: {:?}", e);
    }

    let table = match process::table() {
        Some(table) => table,
        None => {
            println!("process table missing; halting");
            erebos::arch::halt();
        }
    };
    let pid = table.bootstrap(
        process::USER_BASE as u64,
        process::USER_STACK_TOP as u64,
    );
    println!(
        "dropping to EL0 (pid {}, entry {:#x})",
        pid.0,
        process::USER_BASE
    );

    #[cfg(target_arch = "aarch64")]
    unsafe {
        erebos::arch::aarch64::install_vectors();
        erebos::arch::aarch64::enter_usermode(
            process::USER_BASE as u64,
            process::USER_STACK_TOP as u64,
        );
    }

    #[cfg(not(target_arch = "aarch64"))]
    erebos::arch::halt()
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    erebos::panic::kernel_panic(info)
}
