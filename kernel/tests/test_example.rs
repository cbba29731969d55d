//! Example tests using the custom `#[test_case]` framework, as opposed to
//! the plain sequential-call style the other integration binaries use.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(influx_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use influx_kernel::{kernel_assert, kernel_assert_eq, kernel_test, test_module};

test_module!(basic_tests,
    test_addition => {
        let result = 2 + 2;
        kernel_assert_eq!(result, 4);
        Ok(())
    },

    test_memory_allocation => {
        let value = 42u32;
        let ptr = &value as *const u32;
        kernel_assert!(!ptr.is_null());
        kernel_assert_eq!(unsafe { *ptr }, 42);
        Ok(())
    },

    test_signal_action_roundtrip => {
        use influx_kernel::process::signal::{SignalAction, SignalDisposition};

        let mut action = SignalAction::default_action();
        kernel_assert!(action.disposition == SignalDisposition::Default);

        action.disposition = SignalDisposition::Ignore;
        kernel_assert!(action.disposition == SignalDisposition::Ignore);
        Ok(())
    }
);

test_module!(memory_tests,
    test_frame_allocator_bring_up => {
        use influx_kernel::arch::x86_64::multiboot::{MemoryMapEntry, MemoryRegionType};
        use influx_kernel::mm::{frame_allocator, PhysicalAddress};

        let map = [MemoryMapEntry {
            base: 0,
            size: 64 * 1024 * 1024,
            kind: MemoryRegionType::Available,
        }];
        frame_allocator::init(&map, (PhysicalAddress::new(0x10_0000), 0x10_0000));

        let frame = frame_allocator::alloc_page(None);
        kernel_assert!(frame.is_some());
        if let Some(frame) = frame {
            frame_allocator::free_page(frame);
        }
        Ok(())
    }
);

#[cfg(feature = "benchmarks")]
mod benchmarks {
    use influx_kernel::kernel_bench;
    use influx_kernel::sync::Spinlock;

    kernel_bench!(bench_atomic_increment, {
        use core::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        COUNTER.fetch_add(1, Ordering::Relaxed);
    });

    kernel_bench!(bench_spinlock, {
        static LOCK: Spinlock<u64> = Spinlock::new(0);

        let mut guard = LOCK.lock();
        *guard += 1;
    });
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    influx_kernel::serial_println!("\n=== Running Example Tests ===\n");

    test_main();

    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    influx_kernel::test_panic_handler(info)
}
