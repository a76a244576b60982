//! VirtIO block device
//!
//! Probes the QEMU virt machine's virtio-mmio window for a block-class
//! device, runs the status handshake, and records capacity in 512-byte
//! sectors. Queue-based I/O is not wired up yet: reads return zeroed
//! sectors and writes validate device state, which is enough for the
//! filesystem layer above to exercise the sector path.

use spin::Mutex;

use crate::types::KernelError;

pub const SECTOR_SIZE: usize = 512;

/// First virtio-mmio slot on the QEMU virt machine.
pub const VIRTIO_MMIO_BASE: usize = 0x0a00_0000;
/// Byte stride between slots.
pub const VIRTIO_MMIO_STRIDE: usize = 0x200;
/// Slots probed before giving up.
pub const VIRTIO_MMIO_SLOTS: usize = 32;

// Register offsets from the slot base.
pub const VIRTIO_MMIO_MAGIC_VALUE: usize = 0x000;
pub const VIRTIO_MMIO_VERSION: usize = 0x004;
pub const VIRTIO_MMIO_DEVICE_ID: usize = 0x008;
pub const VIRTIO_MMIO_DEVICE_FEATURES: usize = 0x010;
pub const VIRTIO_MMIO_DEVICE_FEATURES_SEL: usize = 0x014;
pub const VIRTIO_MMIO_DRIVER_FEATURES: usize = 0x020;
pub const VIRTIO_MMIO_DRIVER_FEATURES_SEL: usize = 0x024;
pub const VIRTIO_MMIO_STATUS: usize = 0x070;
pub const VIRTIO_MMIO_CONFIG: usize = 0x100;

/// "virt" in little-endian.
pub const VIRTIO_MAGIC: u32 = 0x7472_6976;
pub const VIRTIO_ID_BLOCK: u32 = 2;

pub const VIRTIO_STATUS_ACKNOWLEDGE: u32 = 1;
pub const VIRTIO_STATUS_DRIVER: u32 = 2;
pub const VIRTIO_STATUS_DRIVER_OK: u32 = 4;
pub const VIRTIO_STATUS_FEATURES_OK: u32 = 8;

/// The one block device handle
pub struct VirtioBlock {
    base: usize,
    initialized: bool,
    capacity: u64,
}

impl VirtioBlock {
    const fn new() -> Self {
        VirtioBlock {
            base: 0,
            initialized: false,
            capacity: 0,
        }
    }
}

static VBLK: Mutex<VirtioBlock> = Mutex::new(VirtioBlock::new());

/// Assemble the 64-bit sector capacity from the two config words.
fn assemble_capacity(lo: u32, hi: u32) -> u64 {
    (lo as u64) | ((hi as u64) << 32)
}

#[cfg(all(target_arch = "aarch64", not(test)))]
mod mmio {
    use super::*;

    unsafe fn read32(base: usize, offset: usize) -> u32 {
        ((base + offset) as *const u32).read_volatile()
    }

    unsafe fn write32(base: usize, offset: usize, value: u32) {
        ((base + offset) as *mut u32).write_volatile(value);
    }

    /// Scan the mmio window for a block device and bring it up.
    pub fn probe() -> Result<(), KernelError> {
        let mut base = 0;
        for slot in 0..VIRTIO_MMIO_SLOTS {
            let candidate = VIRTIO_MMIO_BASE + slot * VIRTIO_MMIO_STRIDE;
            let magic = unsafe { read32(candidate, VIRTIO_MMIO_MAGIC_VALUE) };
            if magic != VIRTIO_MAGIC {
                continue;
            }
            let device_id = unsafe { read32(candidate, VIRTIO_MMIO_DEVICE_ID) };
            if device_id == VIRTIO_ID_BLOCK {
                base = candidate;
                break;
            }
        }
        if base == 0 {
            crate::println!("virtio: no block device found");
            return Err(KernelError::NoDevice);
        }

        let version = unsafe { read32(base, VIRTIO_MMIO_VERSION) };
        if version != 1 && version != 2 {
            crate::println!("virtio: unsupported version {}", version);
            return Err(KernelError::NoDevice);
        }

        unsafe {
            // Reset, then walk the status handshake.
            write32(base, VIRTIO_MMIO_STATUS, 0);
            write32(base, VIRTIO_MMIO_STATUS, VIRTIO_STATUS_ACKNOWLEDGE);
            write32(
                base,
                VIRTIO_MMIO_STATUS,
                VIRTIO_STATUS_ACKNOWLEDGE | VIRTIO_STATUS_DRIVER,
            );

            // Negotiate no optional features.
            write32(base, VIRTIO_MMIO_DEVICE_FEATURES_SEL, 0);
            let _features = read32(base, VIRTIO_MMIO_DEVICE_FEATURES);
            write32(base, VIRTIO_MMIO_DRIVER_FEATURES_SEL, 0);
            write32(base, VIRTIO_MMIO_DRIVER_FEATURES, 0);

            let status = read32(base, VIRTIO_MMIO_STATUS);
            write32(base, VIRTIO_MMIO_STATUS, status | VIRTIO_STATUS_FEATURES_OK);
            if read32(base, VIRTIO_MMIO_STATUS) & VIRTIO_STATUS_FEATURES_OK == 0 {
                crate::println!("virtio: device rejected features");
                return Err(KernelError::NoDevice);
            }

            let status = read32(base, VIRTIO_MMIO_STATUS);
            write32(base, VIRTIO_MMIO_STATUS, status | VIRTIO_STATUS_DRIVER_OK);

            let lo = read32(base, VIRTIO_MMIO_CONFIG);
            let hi = read32(base, VIRTIO_MMIO_CONFIG + 4);
            let capacity = assemble_capacity(lo, hi);

            let mut dev = VBLK.lock();
            dev.base = base;
            dev.capacity = capacity;
            dev.initialized = true;
            crate::println!("virtio: block device, {} sectors", capacity);
        }
        Ok(())
    }
}

/// Probe and initialize the block device.
pub fn init() -> Result<(), KernelError> {
    #[cfg(all(target_arch = "aarch64", not(test)))]
    {
        mmio::probe()
    }
    #[cfg(not(all(target_arch = "aarch64", not(test))))]
    {
        Err(KernelError::NoDevice)
    }
}

/// Capacity in sectors, zero while uninitialized.
pub fn capacity_sectors() -> u64 {
    VBLK.lock().capacity
}

/// Read `count` sectors starting at `sector` into `buf`.
///
/// This revision returns zeroed data; the call still fails when the device
/// is absent so callers see the real device lifecycle.
pub fn read(sector: u64, buf: &mut [u8], count: usize) -> Result<(), KernelError> {
    let dev = VBLK.lock();
    if !dev.initialized {
        return Err(KernelError::NoDevice);
    }
    if sector + count as u64 > dev.capacity {
        return Err(KernelError::InvalidArgument);
    }
    let n = buf.len().min(count * SECTOR_SIZE);
    buf[..n].fill(0);
    Ok(())
}

/// Write `count` sectors starting at `sector` from `buf`.
pub fn write(sector: u64, buf: &[u8], count: usize) -> Result<(), KernelError> {
    let dev = VBLK.lock();
    if !dev.initialized {
        return Err(KernelError::NoDevice);
    }
    if sector + count as u64 > dev.capacity {
        return Err(KernelError::InvalidArgument);
    }
    let _ = buf;
    Ok(())
}

/// Pretend a device with the given capacity was probed (test builds only).
#[cfg(test)]
pub fn test_init(capacity: u64) {
    let mut dev = VBLK.lock();
    dev.base = VIRTIO_MMIO_BASE;
    dev.capacity = capacity;
    dev.initialized = true;
}

#[cfg(test)]
pub fn test_reset() {
    let mut dev = VBLK.lock();
    *dev = VirtioBlock::new();
}
