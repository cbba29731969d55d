//! Paging manager (C3): walks and mutates the 4-level x86_64 page tables.
//!
//! Every table is reached through the higher-half direct map rather than an
//! identity mapping, so a table's `PhysicalAddress` is always turned into a
//! pointer via [`PhysicalAddress::to_virtual`]. `map_page`/`unmap_page`
//! allocate intermediate PDPT/PD/PT tables from C2 on demand and zero them
//! before linking them in.

use core::ops::{Index, IndexMut};

use spin::Mutex;

use super::{frame_allocator, PageTableFlags, PhysicalAddress, VirtualAddress, PAGE_SIZE};

pub const ENTRIES_PER_TABLE: usize = 512;

#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

const PHYS_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn flags(&self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.0 & !PHYS_ADDR_MASK)
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(PageTableFlags::PRESENT)
    }

    pub fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 & PHYS_ADDR_MASK)
    }

    pub fn set(&mut self, addr: PhysicalAddress, flags: PageTableFlags) {
        self.0 = (addr.as_u64() & PHYS_ADDR_MASK) | flags.bits();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

impl PageTable {
    fn zero(&mut self) {
        for e in &mut self.entries {
            e.clear();
        }
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, i: usize) -> &Self::Output {
        &self.entries[i]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.entries[i]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    AllocationFailed,
    AlreadyMapped,
    NotMapped,
}

static ROOT: Mutex<Option<PhysicalAddress>> = Mutex::new(None);

fn table_at(phys: PhysicalAddress) -> &'static mut PageTable {
    // SAFETY: `phys` always names a table this module allocated and zeroed,
    // reachable through the direct map for the kernel's lifetime.
    unsafe { &mut *phys.to_virtual().as_mut_ptr::<PageTable>() }
}

/// Adopt the page table the boot stage left active in CR3 as C3's root.
pub fn init() {
    let root = crate::arch::x86_64::mmu::read_cr3();
    *ROOT.lock() = Some(root);
}

fn root() -> PhysicalAddress {
    ROOT.lock().expect("page table manager used before init")
}

/// Walk to (allocating if necessary) the PT entry for `addr`, creating any
/// missing PML4/PDPT/PD tables along the way.
fn walk_create(addr: VirtualAddress) -> Result<&'static mut PageTableEntry, PagingError> {
    let (l4, l3, l2, l1, _) = addr.indices();
    let mut table = table_at(root());

    for index in [l4, l3, l2] {
        let entry = &mut table[index];
        if !entry.is_present() {
            let frame = frame_allocator::alloc_page(None).ok_or(PagingError::AllocationFailed)?;
            let child = table_at(frame.as_address());
            child.zero();
            entry.set(frame.as_address(), PageTableFlags::PRESENT | PageTableFlags::WRITABLE);
        }
        table = table_at(entry.address());
    }

    Ok(&mut table[l1])
}

/// Walk to the PT entry for `addr` without creating missing tables.
fn walk_lookup(addr: VirtualAddress) -> Option<&'static mut PageTableEntry> {
    let (l4, l3, l2, l1, _) = addr.indices();
    let mut table = table_at(root());
    for index in [l4, l3, l2] {
        let entry = &table[index];
        if !entry.is_present() {
            return None;
        }
        table = table_at(entry.address());
    }
    Some(&mut table[l1])
}

/// Accessors named after the x86_64 table levels, for callers that need to
/// inspect the hierarchy directly (diagnostics, `temp_map_page`).
pub fn pml4e(addr: VirtualAddress) -> Option<PageTableEntry> {
    let (l4, ..) = addr.indices();
    Some(table_at(root())[l4])
}

pub fn pdpe(addr: VirtualAddress) -> Option<PageTableEntry> {
    let (l4, l3, ..) = addr.indices();
    let e = table_at(root())[l4];
    if !e.is_present() {
        return None;
    }
    Some(table_at(e.address())[l3])
}

pub fn pde(addr: VirtualAddress) -> Option<PageTableEntry> {
    let (l4, l3, l2, ..) = addr.indices();
    let e = table_at(root())[l4];
    if !e.is_present() {
        return None;
    }
    let e = table_at(e.address())[l3];
    if !e.is_present() {
        return None;
    }
    Some(table_at(e.address())[l2])
}

pub fn pte(addr: VirtualAddress) -> Option<PageTableEntry> {
    walk_lookup(addr).map(|e| *e)
}

/// Map a single 4 KiB page, creating intermediate tables on demand.
pub fn map_page(page: VirtualAddress, frame: PhysicalAddress, flags: PageTableFlags) -> Result<(), PagingError> {
    let entry = walk_create(page)?;
    if entry.is_present() {
        return Err(PagingError::AlreadyMapped);
    }
    entry.set(frame, flags | PageTableFlags::PRESENT);
    crate::arch::x86_64::mmu::invlpg(page);
    Ok(())
}

/// Unmap a single page, returning the frame it pointed to.
pub fn unmap_page(page: VirtualAddress) -> Result<PhysicalAddress, PagingError> {
    let entry = walk_lookup(page).ok_or(PagingError::NotMapped)?;
    if !entry.is_present() {
        return Err(PagingError::NotMapped);
    }
    let frame = entry.address();
    entry.clear();
    crate::arch::x86_64::mmu::invlpg(page);
    Ok(frame)
}

/// Rewrite the permission bits of an already-mapped page in place.
pub fn set_pte_permissions(page: VirtualAddress, prot: super::Protection) -> Result<(), PagingError> {
    let entry = walk_lookup(page).ok_or(PagingError::NotMapped)?;
    if !entry.is_present() {
        return Err(PagingError::NotMapped);
    }
    let frame = entry.address();
    entry.set(frame, super::PageTableFlags::from_protection(prot, false) | PageTableFlags::PRESENT);
    crate::arch::x86_64::mmu::invlpg(page);
    Ok(())
}

pub fn get_physical_address(page: VirtualAddress) -> Option<PhysicalAddress> {
    let entry = walk_lookup(page)?;
    if entry.is_present() {
        let offset = page.as_u64() & (PAGE_SIZE - 1);
        Some(entry.address().offset(offset))
    } else {
        None
    }
}

/// A small fixed window used only during bootstrap, before C4 is live, to
/// briefly map an arbitrary physical page (e.g. to zero a freshly allocated
/// table that isn't reachable through the direct map yet).
const TEMP_MAP_ADDRESS: u64 = super::HIGHER_HALF_KERNEL_OFFSET - PAGE_SIZE;

pub fn temp_map_page(phys: PhysicalAddress) -> Result<VirtualAddress, PagingError> {
    let addr = VirtualAddress::new(TEMP_MAP_ADDRESS);
    map_page(addr, phys, PageTableFlags::PRESENT | PageTableFlags::WRITABLE)?;
    Ok(addr)
}

pub fn unmap_temp_mapping() {
    let addr = VirtualAddress::new(TEMP_MAP_ADDRESS);
    let _ = unmap_page(addr);
}

/// First PML4 index in the higher half (`0xFFFF_8000_0000_0000` and up).
const KERNEL_PML4_START: usize = 256;

/// Allocate a fresh PML4 for `fork`/`exec`, sharing the kernel's higher-half
/// mappings (entries 256..512) with the current root so every address space
/// sees the same kernel image and direct map without retranslating it.
pub fn new_address_space() -> Result<PhysicalAddress, PagingError> {
    let frame = frame_allocator::alloc_page(None).ok_or(PagingError::AllocationFailed)?;
    let new_root = frame.as_address();
    let table = table_at(new_root);
    table.zero();

    let current = table_at(root());
    for index in KERNEL_PML4_START..ENTRIES_PER_TABLE {
        table[index] = current[index];
    }

    Ok(new_root)
}

/// Current root as last adopted by `init`/`set_root`, independent of what is
/// actually loaded in `CR3` right now.
pub fn current_root() -> PhysicalAddress {
    root()
}

/// Switch C3's notion of the active root, used by the scheduler's context
/// switch alongside writing `CR3` itself.
pub fn set_root(new_root: PhysicalAddress) {
    *ROOT.lock() = Some(new_root);
}

/// Run `f` with `root` temporarily adopted as both C3's root and `CR3`,
/// restoring the previous root afterward. Used by `fork`/`exec` to map pages
/// into a not-yet-scheduled address space through the ordinary `map_page`
/// path.
pub fn with_address_space<R>(new_root: PhysicalAddress, f: impl FnOnce() -> R) -> R {
    let previous = root();
    if previous != new_root {
        *ROOT.lock() = Some(new_root);
        crate::arch::x86_64::mmu::write_cr3(new_root);
    }
    let result = f();
    if previous != new_root {
        *ROOT.lock() = Some(previous);
        crate::arch::x86_64::mmu::write_cr3(previous);
    }
    result
}
