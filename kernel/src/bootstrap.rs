//! Kernel bring-up.
//!
//! Reduces the multiboot2 handoff into the pieces C2 needs, then brings up
//! memory management and the scheduler in order. This is the single path
//! `multiboot_main` hands control to; there is no separate "run forever"
//! stage after it — the idle thread it leaves running is driven entirely by
//! `sched::timer_tick`.

use crate::arch;
use crate::arch::x86_64::multiboot::BootInfo;
use crate::config;
use crate::irq;
use crate::log_service;
use crate::mm;
use crate::sched;

/// Bootstrap task/thread id: the boot context becomes thread 0 once the
/// scheduler adopts it.
pub const BOOTSTRAP_PID: u64 = 0;
pub const BOOTSTRAP_TID: u64 = 0;

/// Entry point `multiboot_main` hands the reduced boot record to. Never
/// returns.
pub fn kernel_main_impl(boot_info: BootInfo) -> ! {
    arch::x86_64::entry::arch_early_init();
    config::parse_command_line(boot_info.command_line());

    arch::x86_64::bootstrap::stage1_start();
    arch::x86_64::init();
    irq::init().expect("IRQ manager bring-up failed");
    log_service::log_init();
    arch::x86_64::bootstrap::stage1_complete();

    arch::x86_64::bootstrap::stage2_start();
    let kernel_image = boot_info.kernel_module;
    mm::init(boot_info.memory_map(), kernel_image);
    arch::x86_64::bootstrap::stage2_complete();

    arch::x86_64::bootstrap::stage3_start();
    sched::init().expect("scheduler bring-up failed");
    arch::x86_64::bootstrap::stage3_complete();

    arch::x86_64::bootstrap::stage4_complete();

    arch::enable_interrupts();
    loop {
        arch::idle();
    }
}
