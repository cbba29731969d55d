//! Kernel binary entry point.
//!
//! The actual boot path lives in the library crate: `multiboot_main`
//! (exported `#[no_mangle]` from [`influx_kernel::arch::x86_64::multiboot`])
//! is what the linker script points the loader at. This binary exists only
//! to supply the panic handler a final `no_std`/`no_main` artifact needs.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    influx_kernel::arch::x86_64::entry::arch_panic_handler(info);
    influx_kernel::arch::halt();
}
