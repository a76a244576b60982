//! Console service
//!
//! PL011 UART driver for the QEMU virt machine plus the kernel's text
//! output macros. The console is a raw 8-bit byte stream: no echoing, no
//! line buffering. In test builds output is captured and input is injected
//! through in-memory buffers instead of touching hardware.

use core::fmt::{self, Write};
use spin::Mutex;

/// QEMU virt machine PL011 base
#[cfg(not(test))]
const UART_BASE: usize = 0x0900_0000;

#[cfg(not(test))]
const UART_DR: usize = 0x00;
#[cfg(not(test))]
const UART_FR: usize = 0x18;
#[cfg(not(test))]
const FR_RXFE: u32 = 1 << 4;
#[cfg(not(test))]
const FR_TXFF: u32 = 1 << 5;

#[cfg(not(test))]
struct Pl011 {
    base: usize,
}

#[cfg(not(test))]
impl Pl011 {
    const fn new(base: usize) -> Self {
        Self { base }
    }

    unsafe fn flags(&self) -> u32 {
        ((self.base + UART_FR) as *const u32).read_volatile()
    }

    unsafe fn putc(&self, c: u8) {
        while self.flags() & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        ((self.base + UART_DR) as *mut u8).write_volatile(c);
    }

    /// Blocking receive of one byte.
    unsafe fn getc(&self) -> u8 {
        while self.flags() & FR_RXFE != 0 {
            core::hint::spin_loop();
        }
        ((self.base + UART_DR) as *const u8).read_volatile()
    }
}

/// Console state
pub struct Console {
    #[cfg(test)]
    output: heapless::String<4096>,
    #[cfg(test)]
    input: heapless::Deque<u8, 64>,
}

impl Console {
    pub const fn new() -> Self {
        Console {
            #[cfg(test)]
            output: heapless::String::new(),
            #[cfg(test)]
            input: heapless::Deque::new(),
        }
    }

    /// Write a byte to the console
    pub fn write_byte(&mut self, byte: u8) {
        #[cfg(test)]
        {
            if byte.is_ascii() {
                let _ = self.output.push(byte as char);
            }
        }

        #[cfg(not(test))]
        unsafe {
            Pl011::new(UART_BASE).putc(byte);
        }
    }

    /// Write a string, translating `\n` for serial terminals
    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }

    /// Read one byte from the serial device
    ///
    /// Blocks on hardware; in test builds drains the injected input and
    /// reports `None` when it runs dry.
    pub fn read_byte(&mut self) -> Option<u8> {
        #[cfg(test)]
        {
            self.input.pop_front()
        }

        #[cfg(not(test))]
        unsafe {
            Some(Pl011::new(UART_BASE).getc())
        }
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_str(s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Initialize the console subsystem
pub fn init() {
    // The PL011 comes up usable from the firmware; nothing to configure
    // for polled byte I/O.
}

/// Print formatted text to the console
pub fn print(args: fmt::Arguments) {
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Write one raw byte (the PUTC service)
pub fn putc(c: u8) {
    CONSOLE.lock().write_byte(c);
}

/// Blocking read of one raw byte (the GETC service)
pub fn getc() -> Option<u8> {
    CONSOLE.lock().read_byte()
}

/// Write a string of raw bytes (the PUTS service)
pub fn puts(s: &str) {
    let mut console = CONSOLE.lock();
    for byte in s.bytes() {
        console.write_byte(byte);
    }
}

/// Inject bytes for `getc` in tests.
#[cfg(test)]
pub fn push_input(bytes: &[u8]) {
    let mut console = CONSOLE.lock();
    for &b in bytes {
        let _ = console.input.push_back(b);
    }
}

/// Drain and return everything printed so far (test builds only).
#[cfg(test)]
pub fn take_output() -> alloc::string::String {
    let mut console = CONSOLE.lock();
    let out = alloc::string::String::from(console.output.as_str());
    console.output.clear();
    out
}

/// Print macro for kernel use
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    };
}

/// Print with newline macro
#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n");
    };
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*));
    };
}
