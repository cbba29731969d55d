//! Context switch cost benchmark: the register save/restore sequence
//! [`influx_kernel::arch::x86_64::context`] uses on every reschedule.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use influx_kernel::{exit_qemu, serial_println, test_panic_handler, BenchmarkRunner, QemuExitCode};

const CONTEXT_SWITCH_TARGET_NS: u64 = 10_000;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Context Switch Benchmark");
    serial_println!("Target: < {} ns", CONTEXT_SWITCH_TARGET_NS);

    let runner = BenchmarkRunner::new();
    let result = runner.run_benchmark("register_save_restore", || {
        // SAFETY: saves and immediately restores the full general-purpose
        // register file; no side effects survive the sequence.
        unsafe {
            core::arch::asm!(
                "push rax", "push rbx", "push rcx", "push rdx",
                "push rsi", "push rdi", "push rbp",
                "push r8", "push r9", "push r10", "push r11",
                "push r12", "push r13", "push r14", "push r15",
                "pop r15", "pop r14", "pop r13", "pop r12", "pop r11",
                "pop r10", "pop r9", "pop r8",
                "pop rbp", "pop rdi", "pop rsi", "pop rdx", "pop rcx", "pop rbx", "pop rax",
            );
        }
    });

    if result.avg_time_ns < CONTEXT_SWITCH_TARGET_NS {
        serial_println!("PASS: {} ns < {} ns", result.avg_time_ns, CONTEXT_SWITCH_TARGET_NS);
    } else {
        serial_println!("FAIL: {} ns >= {} ns", result.avg_time_ns, CONTEXT_SWITCH_TARGET_NS);
    }

    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
