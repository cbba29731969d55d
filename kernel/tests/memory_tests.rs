//! Memory management integration tests: exercises C2's frame allocator
//! directly against a synthetic memory map, the way `mm::init` would drive
//! it from a real multiboot2 handoff.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use influx_kernel::arch::x86_64::multiboot::{MemoryMapEntry, MemoryRegionType};
use influx_kernel::mm::{self, PhysicalAddress};
use influx_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[path = "common/mod.rs"]
mod common;

fn boot_memory_map() -> [MemoryMapEntry; 1] {
    [MemoryMapEntry {
        base: 0,
        size: 256 * 1024 * 1024,
        kind: MemoryRegionType::Available,
    }]
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Memory Management Tests");

    let map = boot_memory_map();
    mm::frame_allocator::init(&map, (PhysicalAddress::new(0x10_0000), 0x10_0000));

    test_frame_alloc_and_free();
    test_frame_allocator_avoids_low_memory();
    test_consecutive_allocation();

    serial_println!("All memory tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_frame_alloc_and_free() {
    let f1 = mm::frame_allocator::alloc_page(None).expect("first allocation failed");
    let f2 = mm::frame_allocator::alloc_page(None).expect("second allocation failed");
    assert_ne!(f1, f2);

    mm::frame_allocator::free_page(f1);
    let f3 = mm::frame_allocator::alloc_page(None).expect("reallocation after free failed");
    assert_eq!(f1, f3);

    serial_println!("[ok] frame alloc/free recycles frames");
}

fn test_frame_allocator_avoids_low_memory() {
    let frame = mm::frame_allocator::alloc_page(None).expect("allocation failed");
    assert!(frame.as_address().as_u64() >= 0x10_0000);
    serial_println!("[ok] frames below 1 MiB are never handed out");
}

fn test_consecutive_allocation() {
    let base = mm::frame_allocator::alloc_consecutive(8).expect("consecutive allocation failed");
    let next = mm::frame_allocator::alloc_page(None).expect("allocation after run failed");
    assert_eq!(next.as_u64(), base.as_u64() + 8);
    serial_println!("[ok] consecutive allocation returns a contiguous run");
}
