//! Memory management: physical frames (C1/C2), page tables (C3), the kernel
//! virtual address allocator (C4), and the kernel heap (C5).
//!
//! Initialization order is fixed and encoded here: the physical bitmap must
//! exist before the paging manager can allocate table frames, the paging
//! manager must be live before the virtual allocator can map anything, and
//! the virtual allocator must be live before the heap can claim its backing
//! pages.

#![allow(dead_code)]

use bitflags::bitflags;

pub mod bitmap;
pub mod frame_allocator;
pub mod heap;
pub mod page_table;
pub mod vma;

pub use frame_allocator::{FrameAllocatorError, FrameNumber};

/// Base of the higher-half direct map: all physical RAM is identity-mapped
/// here so page-table walks never need temporary mappings after bootstrap.
pub const HIGHER_HALF_KERNEL_OFFSET: u64 = 0xFFFF_8000_0000_0000;

/// Start of the kernel VMA range managed by C4.
pub const KERNEL_VMA_START: u64 = HIGHER_HALF_KERNEL_OFFSET;

/// Size of the kernel VMA range: one PML4 entry's worth, 512 GiB.
pub const KERNEL_VMA_SIZE: u64 = 0x0000_8000_0000_0000;

pub const PAGE_SIZE: u64 = 4096;

/// A physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub const fn as_frame(self) -> FrameNumber {
        FrameNumber::new(self.0 / PAGE_SIZE)
    }

    /// Address of this physical page through the higher-half direct map.
    pub const fn to_virtual(self) -> VirtualAddress {
        VirtualAddress::new(HIGHER_HALF_KERNEL_OFFSET + self.0)
    }

    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    pub const fn is_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }
}

/// A virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }

    pub const fn align_down(self, align: u64) -> Self {
        Self(self.0 & !(align - 1))
    }

    pub const fn align_up(self, align: u64) -> Self {
        Self((self.0 + align - 1) & !(align - 1))
    }

    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Split into the 4-level page table walk indices plus the 12-bit
    /// in-page offset, per §6's fixed x86_64 layout (9 bits/level).
    pub const fn indices(self) -> (usize, usize, usize, usize, usize) {
        let a = self.0;
        (
            ((a >> 39) & 0x1FF) as usize,
            ((a >> 30) & 0x1FF) as usize,
            ((a >> 21) & 0x1FF) as usize,
            ((a >> 12) & 0x1FF) as usize,
            (a & 0xFFF) as usize,
        )
    }
}

bitflags! {
    /// Memory protection requested by a caller of the virtual allocator or
    /// the paging manager. Distinct from [`PageTableFlags`], which is the
    /// on-the-wire leaf-entry encoding C3 translates this into.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        const R = 1 << 0;
        const W = 1 << 1;
        const X = 1 << 2;
    }
}

impl Protection {
    pub const NONE: Self = Self::empty();
    pub const RW: Self = Self::R.union(Self::W);
    pub const RX: Self = Self::R.union(Self::X);
}

bitflags! {
    /// Leaf page-table entry bit layout, fixed by §6: present(0), RW(1),
    /// U/S(2), PWT(3), PCD(4), A(5), D(6), PAT/huge(7), G(8), AVL(9-11),
    /// phys addr(12-51), AVL(52-62), NX(63).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageTableFlags: u64 {
        const PRESENT        = 1 << 0;
        const WRITABLE       = 1 << 1;
        const USER           = 1 << 2;
        const WRITE_THROUGH  = 1 << 3;
        const NO_CACHE       = 1 << 4;
        const ACCESSED       = 1 << 5;
        const DIRTY          = 1 << 6;
        const HUGE_PAGE      = 1 << 7;
        const GLOBAL         = 1 << 8;
        const NO_EXECUTE     = 1 << 63;
    }
}

impl PageTableFlags {
    /// Translate a `(R,W,X)` request into leaf bits: `PROT_NONE` clears
    /// `present`; otherwise RW/NX are derived and `present`/`user` are set.
    pub fn from_protection(prot: Protection, user: bool) -> Self {
        if prot.is_empty() {
            return Self::empty();
        }
        let mut flags = Self::PRESENT;
        if prot.contains(Protection::W) {
            flags |= Self::WRITABLE;
        }
        if !prot.contains(Protection::X) {
            flags |= Self::NO_EXECUTE;
        }
        if user {
            flags |= Self::USER;
        }
        flags
    }

    pub fn to_protection(self) -> Protection {
        if !self.contains(Self::PRESENT) {
            return Protection::NONE;
        }
        let mut prot = Protection::R;
        if self.contains(Self::WRITABLE) {
            prot |= Protection::W;
        }
        if !self.contains(Self::NO_EXECUTE) {
            prot |= Protection::X;
        }
        prot
    }
}

/// Bring up C2 → C3 → C4 → C5 in order, then the global heap is live.
///
/// `memory_map` is the reduced entry list from `BootInfo` (external
/// multiboot2 collaborator); `kernel_image` is the `{start,size}` physical
/// range of the currently-running kernel image.
pub fn init(
    memory_map: &[crate::arch::x86_64::multiboot::MemoryMapEntry],
    kernel_image: (PhysicalAddress, u64),
) {
    log::info!("mm: initializing physical frame allocator");
    frame_allocator::init(memory_map, kernel_image);

    log::info!("mm: adopting boot page table");
    page_table::init();

    log::info!("mm: bootstrapping kernel virtual allocator");
    vma::init();

    log::info!("mm: bringing up kernel heap");
    heap::init();

    log::info!("mm: initialized");
}
