//! Frame allocation benchmark: C2's `alloc_page`/`free_page` cost under a
//! synthetic memory map.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use influx_kernel::arch::x86_64::multiboot::{MemoryMapEntry, MemoryRegionType};
use influx_kernel::mm::{frame_allocator, PhysicalAddress};
use influx_kernel::{exit_qemu, serial_println, test_panic_handler, BenchmarkRunner, QemuExitCode};

const FRAME_ALLOC_TARGET_NS: u64 = 1_000;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Frame Allocation Benchmark");
    serial_println!("Target: < {} ns", FRAME_ALLOC_TARGET_NS);

    let map = [MemoryMapEntry {
        base: 0,
        size: 256 * 1024 * 1024,
        kind: MemoryRegionType::Available,
    }];
    frame_allocator::init(&map, (PhysicalAddress::new(0x10_0000), 0x10_0000));

    let runner = BenchmarkRunner::new();
    let alloc_result = runner.run_benchmark("alloc_page", || {
        let frame = frame_allocator::alloc_page(None).expect("out of frames");
        frame_allocator::free_page(frame);
    });

    if alloc_result.avg_time_ns < FRAME_ALLOC_TARGET_NS {
        serial_println!("PASS: {} ns < {} ns", alloc_result.avg_time_ns, FRAME_ALLOC_TARGET_NS);
    } else {
        serial_println!("FAIL: {} ns >= {} ns", alloc_result.avg_time_ns, FRAME_ALLOC_TARGET_NS);
    }

    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
