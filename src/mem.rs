//! Kernel byte heap
//!
//! A spin-locked bump allocator registered as the global allocator. Kernel
//! objects (processes, open files, binding nodes, backend trees) come from
//! here; there is no deallocation pass, matching the single boot-to-halt
//! lifetime of the kernel. Tests use the host allocator instead.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;
use spin::Mutex;

/// Heap placement on the QEMU virt machine (RAM starts at 0x4000_0000).
pub const HEAP_START: usize = 0x4100_0000;
/// Heap size in bytes.
pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Simple bump allocator for the kernel byte heap
pub struct BumpAllocator {
    heap_start: usize,
    heap_end: usize,
    next: usize,
}

impl BumpAllocator {
    pub const fn new() -> Self {
        BumpAllocator {
            heap_start: 0,
            heap_end: 0,
            next: 0,
        }
    }

    /// Initialize with heap bounds
    ///
    /// # Safety
    ///
    /// The range must be backed by RAM and unused by anything else.
    pub unsafe fn init(&mut self, heap_start: usize, heap_size: usize) {
        self.heap_start = heap_start;
        self.heap_end = heap_start + heap_size;
        self.next = heap_start;
    }

    /// Allocate memory, or null when the heap is exhausted
    pub fn allocate(&mut self, layout: Layout) -> *mut u8 {
        let alloc_start = align_up(self.next, layout.align());
        let alloc_end = match alloc_start.checked_add(layout.size()) {
            Some(end) => end,
            None => return null_mut(),
        };

        if alloc_end > self.heap_end {
            return null_mut();
        }

        self.next = alloc_end;
        alloc_start as *mut u8
    }
}

/// Align address upward to alignment
fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

/// Global allocator wrapper
pub struct KernelHeap {
    inner: Mutex<BumpAllocator>,
}

impl KernelHeap {
    pub const fn new() -> Self {
        KernelHeap {
            inner: Mutex::new(BumpAllocator::new()),
        }
    }

    /// # Safety
    ///
    /// See [`BumpAllocator::init`].
    pub unsafe fn init(&self, heap_start: usize, heap_size: usize) {
        self.inner.lock().init(heap_start, heap_size);
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.inner.lock().allocate(layout)
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {
        // Bump allocation: individual frees are dropped on the floor.
    }
}

#[cfg(not(test))]
#[global_allocator]
static HEAP: KernelHeap = KernelHeap::new();

/// Initialize the kernel heap
pub fn init() {
    #[cfg(not(test))]
    unsafe {
        HEAP.init(HEAP_START, HEAP_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_powers_of_two() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 16), 16);
    }

    #[test]
    fn bump_allocations_are_disjoint_and_aligned() {
        static mut ARENA: [u8; 4096] = [0; 4096];
        let mut bump = BumpAllocator::new();
        unsafe {
            let base = core::ptr::addr_of_mut!(ARENA) as usize;
            bump.init(base, 4096);
        }

        let a = bump.allocate(Layout::from_size_align(100, 8).unwrap());
        let b = bump.allocate(Layout::from_size_align(100, 8).unwrap());
        assert!(!a.is_null());
        assert!(!b.is_null());
        assert!(b as usize >= a as usize + 100);
        assert_eq!(a as usize % 8, 0);
        assert_eq!(b as usize % 8, 0);
    }

    #[test]
    fn bump_returns_null_when_exhausted() {
        static mut ARENA: [u8; 128] = [0; 128];
        let mut bump = BumpAllocator::new();
        unsafe {
            let base = core::ptr::addr_of_mut!(ARENA) as usize;
            bump.init(base, 128);
        }

        let a = bump.allocate(Layout::from_size_align(128, 1).unwrap());
        assert!(!a.is_null());
        let b = bump.allocate(Layout::from_size_align(1, 1).unwrap());
        assert!(b.is_null());
    }
}
