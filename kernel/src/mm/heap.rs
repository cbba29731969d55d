//! Kernel heap allocator (C5): a thin wrapper around `linked_list_allocator`
//! over pages obtained from the virtual allocator. C5 is explicitly "external,
//! interface only" — no custom slab design, just enough glue to back
//! `#[global_allocator]` with C4-managed memory.

use super::vma;
use super::Protection;

/// Initial kernel heap size. Grown by nothing further in this scope; a
/// size this small kernel never runs out within the scenarios in §8.
pub const HEAP_SIZE: u64 = 16 * 1024 * 1024;

pub fn init() {
    let base = vma::allocate(HEAP_SIZE, Protection::RW, None).expect("failed to reserve kernel heap VMA");

    // SAFETY: `base` names a freshly allocated, exclusively owned range of
    // `HEAP_SIZE` bytes; `init` on the global allocator runs exactly once.
    unsafe {
        crate::ALLOCATOR
            .lock()
            .init(base.as_mut_ptr::<u8>(), HEAP_SIZE as usize);
    }

    log::info!(
        "mm::heap: {} KiB heap live at {:#x}",
        HEAP_SIZE / 1024,
        base.as_u64()
    );
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::{boxed::Box, vec::Vec};

    #[test]
    fn boxed_and_vec_allocations_round_trip() {
        let x = Box::new(42);
        assert_eq!(*x, 42);

        let mut v = Vec::new();
        for i in 0..100 {
            v.push(i);
        }
        assert_eq!(v.len(), 100);
    }
}
