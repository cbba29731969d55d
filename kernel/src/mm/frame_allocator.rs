//! Physical page frame allocator (C2).
//!
//! A single bitmap, one bit per 4 KiB frame, `bit set ⇔ frame is owned`.
//! Lowest-available tie-break, no zeroing on allocation, frames below 1 MiB
//! permanently reserved. No NUMA, no buddy system, no per-CPU caching — SMP
//! and NUMA are out of scope.
//!
//! Before the real bitmap has a home, allocations are served from a small
//! "early" bitmap covering the first 50 MiB (`EARLY_MEMORY_SIZE`), exactly
//! enough to allocate the frames that will back the real bitmap. `init`
//! performs the early→real transition by OR-ing the early bitmap's bits into
//! the corresponding range of the real one once both exist.

use core::slice;

use spin::Mutex;

use super::{bitmap::Bitmap, PhysicalAddress, PAGE_SIZE};
use crate::arch::x86_64::multiboot::{MemoryMapEntry, MemoryRegionType};

/// Below this physical address, frames are never handed out.
const RESERVED_LOW_MEMORY: u64 = 0x10_0000; // 1 MiB

/// Bootstrap window: large enough to hold the kernel image, the early
/// paging structures, and the real bitmap's own backing frames.
const EARLY_MEMORY_SIZE: u64 = 0x320_0000; // 50 MiB
const EARLY_FRAME_COUNT: usize = (EARLY_MEMORY_SIZE / PAGE_SIZE) as usize;
const EARLY_WORD_COUNT: usize = EARLY_FRAME_COUNT.div_ceil(64);

/// A physical frame number: frame `n` covers `[n * 4096, n * 4096 + 4096)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn as_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    OutOfMemory,
    InvalidFrame,
    InvalidSize,
}

enum Backing {
    Uninit,
    Early {
        words: [u64; EARLY_WORD_COUNT],
    },
    Real {
        // SAFETY: points at frames owned exclusively by the allocator,
        // reachable through the higher-half direct map for the lifetime of
        // the kernel.
        words: &'static mut [u64],
        total_frames: usize,
    },
}

struct State {
    backing: Backing,
}

impl State {
    const fn new() -> Self {
        Self {
            backing: Backing::Uninit,
        }
    }

    fn bitmap(&mut self) -> Bitmap<'_> {
        match &mut self.backing {
            Backing::Uninit => panic!("frame allocator used before init"),
            Backing::Early { words } => Bitmap::new(words, EARLY_FRAME_COUNT, true),
            Backing::Real {
                words,
                total_frames,
            } => Bitmap::new(words, *total_frames, true),
        }
    }
}

static STATE: Mutex<State> = Mutex::new(State::new());

fn mark_reserved_range(bitmap: &mut Bitmap<'_>, start: u64, end: u64) {
    let start_frame = (start / PAGE_SIZE) as usize;
    let end_frame = end.div_ceil(PAGE_SIZE) as usize;
    if end_frame > start_frame {
        bitmap.set_range(start_frame, end_frame - start_frame, true);
    }
}

/// Bring up C2 from the reduced multiboot2 memory map and the physical
/// range of the running kernel image.
pub fn init(memory_map: &[MemoryMapEntry], kernel_image: (PhysicalAddress, u64)) {
    let mut state = STATE.lock();

    let total_phys = memory_map
        .iter()
        .map(|e| e.base + e.size)
        .max()
        .unwrap_or(0);
    let total_frames = (total_phys / PAGE_SIZE) as usize;

    // Phase 1: build the early bitmap covering [0, EARLY_MEMORY_SIZE).
    state.backing = Backing::Early {
        words: [0u64; EARLY_WORD_COUNT],
    };
    {
        let mut early = state.bitmap();
        mark_reserved_range(&mut early, 0, RESERVED_LOW_MEMORY);
        for entry in memory_map {
            if entry.kind != MemoryRegionType::Available {
                mark_reserved_range(&mut early, entry.base, entry.base + entry.size);
            }
        }
        mark_reserved_range(
            &mut early,
            kernel_image.0.as_u64(),
            kernel_image.0.as_u64() + kernel_image.1,
        );
    }

    // Phase 2: allocate frames for the real bitmap out of the early one.
    let real_word_count = total_frames.div_ceil(64);
    let real_bytes = real_word_count * core::mem::size_of::<u64>();
    let real_frames_needed = (real_bytes as u64).div_ceil(PAGE_SIZE) as usize;

    let real_bitmap_frame = {
        let mut early = state.bitmap();
        early
            .search_run(real_frames_needed, false)
            .expect("not enough early memory to host the physical frame bitmap")
    };
    {
        let mut early = state.bitmap();
        early.set_range(real_bitmap_frame, real_frames_needed, true);
    }

    let real_bitmap_phys = PhysicalAddress::new(real_bitmap_frame as u64 * PAGE_SIZE);
    // SAFETY: `real_bitmap_phys` was just reserved above and is reachable
    // through the higher-half direct map, which the boot stage has already
    // mapped over all physical RAM before C2 runs.
    let words: &'static mut [u64] = unsafe {
        let ptr = real_bitmap_phys.to_virtual().as_mut_ptr::<u64>();
        core::ptr::write_bytes(ptr, 0, real_word_count);
        slice::from_raw_parts_mut(ptr, real_word_count)
    };

    let early_words = match &state.backing {
        Backing::Early { words } => *words,
        _ => unreachable!(),
    };

    state.backing = Backing::Real {
        words,
        total_frames,
    };

    // Phase 3: mark the same reservations in the real bitmap, then fold in
    // everything the early bitmap already knows about (including the
    // allocation for the real bitmap's own frames).
    {
        let mut real = state.bitmap();
        mark_reserved_range(&mut real, 0, RESERVED_LOW_MEMORY);
        for entry in memory_map {
            if entry.kind != MemoryRegionType::Available {
                mark_reserved_range(&mut real, entry.base, entry.base + entry.size);
            }
        }
        mark_reserved_range(
            &mut real,
            kernel_image.0.as_u64(),
            kernel_image.0.as_u64() + kernel_image.1,
        );
    }
    if let Backing::Real { words, .. } = &mut state.backing {
        for (i, &w) in early_words.iter().enumerate() {
            words[i] |= w;
        }
    }
}

/// Allocate the first free frame, or `hint` if given and free.
pub fn alloc_page(hint: Option<FrameNumber>) -> Option<FrameNumber> {
    let mut state = STATE.lock();
    if let Some(hint) = hint {
        let idx = hint.as_u64() as usize;
        let mut bitmap = state.bitmap();
        if !bitmap.get(idx) {
            bitmap.set(idx, true);
            return Some(hint);
        }
    }
    let mut bitmap = state.bitmap();
    let idx = bitmap.search_bit(false)?;
    bitmap.set(idx, true);
    Some(FrameNumber::new(idx as u64))
}

/// Allocate a contiguous run of `n` frames.
pub fn alloc_consecutive(n: usize) -> Option<FrameNumber> {
    if n == 0 {
        return None;
    }
    let mut state = STATE.lock();
    let mut bitmap = state.bitmap();
    let idx = bitmap.search_run(n, false)?;
    bitmap.set_range(idx, n, true);
    Some(FrameNumber::new(idx as u64))
}

/// Clear the bit for `frame`. Idempotent on an already-clear frame.
pub fn free_page(frame: FrameNumber) {
    let mut state = STATE.lock();
    let mut bitmap = state.bitmap();
    bitmap.set(frame.as_u64() as usize, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_map(total_bytes: u64) -> ([MemoryMapEntry; 1], (PhysicalAddress, u64)) {
        (
            [MemoryMapEntry {
                base: 0,
                size: total_bytes,
                kind: MemoryRegionType::Available,
            }],
            (PhysicalAddress::new(0x10_0000), 0x10_0000),
        )
    }

    #[test]
    fn alloc_then_free_recycles_frame() {
        let (map, img) = test_map(256 * 1024 * 1024);
        init(&map, img);
        let f1 = alloc_page(None).unwrap();
        let f2 = alloc_page(None).unwrap();
        assert_ne!(f1, f2);
        free_page(f1);
        let f3 = alloc_page(None).unwrap();
        assert_eq!(f1, f3);
    }

    #[test]
    fn low_memory_is_reserved() {
        let (map, img) = test_map(256 * 1024 * 1024);
        init(&map, img);
        let f = alloc_page(None).unwrap();
        assert!(f.as_address().as_u64() >= RESERVED_LOW_MEMORY);
    }

    #[test]
    fn alloc_consecutive_returns_contiguous_run() {
        let (map, img) = test_map(256 * 1024 * 1024);
        init(&map, img);
        let base = alloc_consecutive(8).unwrap();
        let next = alloc_page(None).unwrap();
        assert_eq!(next.as_u64(), base.as_u64() + 8);
    }
}
