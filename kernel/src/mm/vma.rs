//! Kernel virtual address-space allocator (C4).
//!
//! A sorted doubly linked list of [`VmaRegion`]s over the 512 GiB kernel VMA
//! range `[KERNEL_VMA_START, KERNEL_VMA_START + KERNEL_VMA_SIZE)`. Regions
//! are tagged allocated/free and carry the protection they were mapped with;
//! adjacent free regions are always coalesced so the list never holds two
//! neighboring regions of the same state.
//!
//! List nodes live in ordinary 4 KiB pages carved from this same address
//! range, which creates a bootstrap problem: inserting a new allocated
//! region can itself require a fresh node page, which is itself a new
//! allocated region. That's resolved with a single *pending region* slot —
//! the node page is mapped and its nodes put to use immediately, and the
//! region record describing that page is parked in `pending` until the
//! in-flight list mutation finishes, at which point it's spliced in before
//! anything else touches the list. At most one pending region exists at a
//! time.

use core::ptr;

use spin::Mutex;

use super::{page_table, PageTableFlags, Protection, VirtualAddress, KERNEL_VMA_SIZE,
    KERNEL_VMA_START, PAGE_SIZE};
use crate::mm::frame_allocator::{self, FrameNumber};

/// One slot's worth of list node, carved out of a node page.
struct Node {
    base: VirtualAddress,
    size: u64,
    prot: Protection,
    allocated: bool,
    /// Set for pages mapped against a caller-supplied `phys_hint`: `free`
    /// unmaps them but does not return their frames to C2, since the caller
    /// still owns them.
    external: bool,
    prev: *mut Node,
    next: *mut Node,
    /// Free-list link when this slot isn't in the region list.
    free_next: *mut Node,
}

const NODES_PER_PAGE: usize = (PAGE_SIZE as usize) / core::mem::size_of::<Node>();

struct VmaState {
    head: *mut Node,
    /// Freelist of unused node slots across all node pages allocated so far.
    free_slots: *mut Node,
    /// Node page waiting to be spliced into the list as an allocated region.
    pending: Option<(VirtualAddress, u64)>,
}

// SAFETY: all access goes through `STATE`'s `Mutex`; the raw pointers never
// escape the lock.
unsafe impl Send for VmaState {}

static STATE: Mutex<VmaState> = Mutex::new(VmaState {
    head: ptr::null_mut(),
    free_slots: ptr::null_mut(),
    pending: None,
});

impl VmaState {
    /// Pop a free node slot, refilling from a freshly mapped node page if
    /// the freelist is empty. May stash a pending region describing that
    /// page; the caller must splice it in once the current mutation settles.
    unsafe fn alloc_node(&mut self) -> *mut Node {
        if self.free_slots.is_null() {
            self.refill_node_pool();
        }
        let node = self.free_slots;
        // SAFETY: just checked non-null, and every freelist entry points at
        // a live slot inside a mapped node page.
        unsafe {
            self.free_slots = (*node).free_next;
        }
        node
    }

    unsafe fn free_node(&mut self, node: *mut Node) {
        // SAFETY: `node` came from `alloc_node` or the list itself and is
        // no longer reachable from the region list.
        unsafe {
            (*node).free_next = self.free_slots;
        }
        self.free_slots = node;
    }

    /// Map one fresh page, carve it into `NODES_PER_PAGE` node slots, and
    /// stash a pending region describing the page itself.
    unsafe fn refill_node_pool(&mut self) {
        let base = self.first_fit_address(PAGE_SIZE as u64, false);
        let frame = frame_allocator::alloc_page(None).expect("out of physical memory for VMA nodes");
        page_table::map_page(
            base,
            frame.as_address(),
            PageTableFlags::from_protection(Protection::RW, false),
        )
        .expect("failed to map VMA node pool page");

        let page_ptr = base.as_mut_ptr::<Node>();
        for i in 0..NODES_PER_PAGE {
            // SAFETY: `page_ptr` is a freshly mapped, exclusively owned page
            // large enough for `NODES_PER_PAGE` slots.
            unsafe {
                let slot = page_ptr.add(i);
                (*slot).free_next = if i + 1 < NODES_PER_PAGE {
                    page_ptr.add(i + 1)
                } else {
                    self.free_slots
                };
            }
        }
        self.free_slots = page_ptr;
        self.pending = Some((base, PAGE_SIZE as u64));
        let _ = frame; // ownership now tracked by the page table mapping
    }

    /// First-fit scan for a free gap of at least `size` bytes, page-aligned.
    /// `for_allocation` is false only for the internal node-pool bootstrap,
    /// which is allowed to reuse the gap the very first free region leaves.
    fn first_fit_address(&self, size: u64, _for_allocation: bool) -> VirtualAddress {
        let mut cur = self.head;
        loop {
            assert!(!cur.is_null(), "kernel VMA exhausted");
            // SAFETY: list invariant — every reachable node is live.
            let node = unsafe { &*cur };
            if !node.allocated {
                let aligned = node.base.align_up(PAGE_SIZE);
                let slack = aligned.as_u64() - node.base.as_u64();
                if node.size.saturating_sub(slack) >= size {
                    return aligned;
                }
            }
            cur = node.next;
        }
    }

    /// Splice the pending node-pool region into the list as allocated, if
    /// one is waiting. Must run once the current mutation no longer holds a
    /// dangling view of the list (i.e. right before returning to the
    /// caller).
    unsafe fn flush_pending(&mut self) {
        if let Some((base, size)) = self.pending.take() {
            // SAFETY: splicing follows the same insertion logic as a normal
            // allocation; the region was mapped in `refill_node_pool`.
            unsafe {
                self.mark_allocated(base, size, Protection::RW, false);
            }
        }
    }

    /// Walk to the free region containing `[base, base+size)` and split it
    /// into head-free / new-alloc / tail-free, marking the middle piece
    /// allocated. `base` must fall within some free region (the node-pool
    /// bootstrap calls this for its own freshly chosen address).
    unsafe fn mark_allocated(&mut self, base: VirtualAddress, size: u64, prot: Protection, external: bool) {
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: list invariant.
            let node = unsafe { &mut *cur };
            let node_end = node.base.as_u64() + node.size;
            if !node.allocated && node.base.as_u64() <= base.as_u64() && base.as_u64() + size <= node_end {
                let head_len = base.as_u64() - node.base.as_u64();
                let tail_len = node_end - (base.as_u64() + size);

                if tail_len > 0 {
                    // SAFETY: freelist is non-empty or gets refilled above;
                    // this does not recurse because PAGE_SIZE-sized node
                    // pool allocations never land here with a nonzero tail
                    // during their own bootstrap.
                    let tail = unsafe { self.alloc_node() };
                    // SAFETY: `tail` is a fresh, exclusively owned slot.
                    unsafe {
                        (*tail).base = VirtualAddress::new(base.as_u64() + size);
                        (*tail).size = tail_len;
                        (*tail).prot = Protection::NONE;
                        (*tail).allocated = false;
                        (*tail).external = false;
                        (*tail).prev = cur;
                        (*tail).next = node.next;
                        if !node.next.is_null() {
                            (*node.next).prev = tail;
                        }
                        node.next = tail;
                    }
                }

                if head_len > 0 {
                    node.size = head_len;
                    // SAFETY: fresh slot for the allocated middle region.
                    let mid = unsafe { self.alloc_node() };
                    unsafe {
                        (*mid).base = base;
                        (*mid).size = size;
                        (*mid).prot = prot;
                        (*mid).allocated = true;
                        (*mid).external = external;
                        (*mid).prev = cur;
                        (*mid).next = node.next;
                        if !node.next.is_null() {
                            (*node.next).prev = mid;
                        }
                        node.next = mid;
                    }
                } else {
                    node.base = base;
                    node.size = size;
                    node.prot = prot;
                    node.allocated = true;
                    node.external = external;
                }
                return;
            }
            cur = node.next;
        }
        panic!("VMA allocation target not inside a free region");
    }

    /// Inverse of `mark_allocated`: flip `[base, base+size)` back to free,
    /// coalescing with free neighbors.
    unsafe fn mark_free(&mut self, base: VirtualAddress, size: u64) -> bool {
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: list invariant.
            let node = unsafe { &mut *cur };
            if node.allocated && node.base == base && node.size == size {
                node.allocated = false;
                node.prot = Protection::NONE;
                node.external = false;

                // Coalesce with the next node if it's also free.
                let next = node.next;
                if !next.is_null() {
                    // SAFETY: list invariant.
                    let next_ref = unsafe { &*next };
                    if !next_ref.allocated {
                        node.size += next_ref.size;
                        node.next = next_ref.next;
                        if !next_ref.next.is_null() {
                            // SAFETY: list invariant.
                            unsafe {
                                (*next_ref.next).prev = cur;
                            }
                        }
                        // SAFETY: `next` is detached from the list.
                        unsafe {
                            self.free_node(next);
                        }
                    }
                }

                // Coalesce with the previous node if it's also free.
                let prev = node.prev;
                if !prev.is_null() {
                    // SAFETY: list invariant.
                    let prev_ref = unsafe { &mut *prev };
                    if !prev_ref.allocated {
                        prev_ref.size += node.size;
                        prev_ref.next = node.next;
                        if !node.next.is_null() {
                            // SAFETY: list invariant.
                            unsafe {
                                (*node.next).prev = prev;
                            }
                        }
                        // SAFETY: `cur` is detached from the list.
                        unsafe {
                            self.free_node(cur);
                        }
                    }
                }
                return true;
            }
            cur = node.next;
        }
        false
    }
}

/// Reserve `[base, base+size)` as already-allocated before the allocator
/// takes general requests — used for the kernel image, the bitmap region,
/// paging structures, and the early console.
fn reserve(state: &mut VmaState, base: VirtualAddress, size: u64) {
    // SAFETY: called only during `init`, before any concurrent access.
    unsafe {
        state.mark_allocated(base, size, Protection::RW, true);
        state.flush_pending();
    }
}

/// Bootstrap the list as one free region spanning the whole kernel VMA, then
/// carve out the fixed reservations `init`'s caller is responsible for
/// communicating through [`reserve_boot_regions`].
pub fn init() {
    let mut state = STATE.lock();
    let first_page = VirtualAddress::new(KERNEL_VMA_START);
    let frame = frame_allocator::alloc_page(None).expect("out of physical memory for the initial VMA node page");
    page_table::map_page(
        first_page,
        frame.as_address(),
        PageTableFlags::from_protection(Protection::RW, false),
    )
    .expect("failed to map the initial VMA node page");

    let page_ptr = first_page.as_mut_ptr::<Node>();
    for i in 0..NODES_PER_PAGE {
        // SAFETY: freshly mapped, exclusively owned page.
        unsafe {
            let slot = page_ptr.add(i);
            (*slot).free_next = if i + 1 < NODES_PER_PAGE {
                page_ptr.add(i + 1)
            } else {
                ptr::null_mut()
            };
        }
    }
    state.free_slots = page_ptr;

    // SAFETY: `free_slots` is non-null; `head` is carved from it below.
    let head = unsafe { state.alloc_node() };
    // SAFETY: fresh slot.
    unsafe {
        (*head).base = VirtualAddress::new(KERNEL_VMA_START);
        (*head).size = KERNEL_VMA_SIZE;
        (*head).prot = Protection::NONE;
        (*head).allocated = false;
        (*head).external = false;
        (*head).prev = ptr::null_mut();
        (*head).next = ptr::null_mut();
    }
    state.head = head;

    reserve(&mut state, first_page, PAGE_SIZE as u64);
}

/// Carve out a fixed, already-known range (kernel image, bitmap region,
/// paging structures, early console) as allocated before general requests
/// begin. Called once per region by the boot sequence after [`init`].
pub fn reserve_boot_region(base: VirtualAddress, size: u64) {
    let mut state = STATE.lock();
    let size = align_up_page(size);
    reserve(&mut state, base, size);
}

fn align_up_page(size: u64) -> u64 {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmaError {
    UnalignedSize,
    OutOfSpace,
    NotFound,
    MapFailed,
}

/// Find `size` bytes of free kernel VMA, map each page (against `phys_hint`
/// if given, else a freshly allocated frame), set the requested protection,
/// and return the base address. On a partial mapping failure every page
/// mapped so far is unmapped and its frame freed before returning the error.
pub fn allocate(size: u64, prot: Protection, phys_hint: Option<FrameNumber>) -> Result<VirtualAddress, VmaError> {
    if size == 0 || size % PAGE_SIZE != 0 {
        return Err(VmaError::UnalignedSize);
    }
    let mut state = STATE.lock();
    let base = state.first_fit_address(size, true);

    let page_count = size / PAGE_SIZE;
    let mut mapped = 0u64;
    for i in 0..page_count {
        let page = VirtualAddress::new(base.as_u64() + i * PAGE_SIZE);
        let frame = match phys_hint {
            Some(hint) => FrameNumber::new(hint.as_u64() + i),
            None => match frame_allocator::alloc_page(None) {
                Some(f) => f,
                None => {
                    unmap_range(base, mapped, phys_hint.is_some());
                    return Err(VmaError::OutOfSpace);
                }
            },
        };
        if page_table::map_page(page, frame.as_address(), PageTableFlags::from_protection(prot, false)).is_err() {
            if phys_hint.is_none() {
                frame_allocator::free_page(frame);
            }
            unmap_range(base, mapped, phys_hint.is_some());
            return Err(VmaError::MapFailed);
        }
        mapped += PAGE_SIZE;
    }

    // SAFETY: `base` was just selected as the start of a free region.
    unsafe {
        state.mark_allocated(base, size, prot, phys_hint.is_some());
        state.flush_pending();
    }
    Ok(base)
}

fn unmap_range(base: VirtualAddress, mapped_bytes: u64, external: bool) {
    let pages = mapped_bytes / PAGE_SIZE;
    for i in 0..pages {
        let page = VirtualAddress::new(base.as_u64() + i * PAGE_SIZE);
        if let Some(phys) = page_table::get_physical_address(page) {
            let _ = page_table::unmap_page(page);
            if !external {
                frame_allocator::free_page(phys.as_frame());
            }
        }
    }
}

/// Unmap `[addr, addr+size)`, freeing frames unless they were mapped
/// against an external `phys_hint` the caller still owns, and flip the
/// region back to free (coalescing with free neighbors).
pub fn free(addr: VirtualAddress, size: u64) -> Result<(), VmaError> {
    let mut state = STATE.lock();
    let size = align_up_page(size);

    // Determine external-ness before the node disappears into a coalesced
    // neighbor.
    let external = {
        let mut cur = state.head;
        let mut found = None;
        while !cur.is_null() {
            // SAFETY: list invariant.
            let node = unsafe { &*cur };
            if node.allocated && node.base == addr && node.size == size {
                found = Some(node.external);
                break;
            }
            cur = node.next;
        }
        found.ok_or(VmaError::NotFound)?
    };

    unmap_range(addr, size, external);

    // SAFETY: `addr`/`size` matched an allocated node above.
    let removed = unsafe { state.mark_free(addr, size) };
    if !removed {
        return Err(VmaError::NotFound);
    }
    Ok(())
}
