//! Boot-stage console output for [`crate::bootstrap::kernel_main_impl`].

use crate::early_println;

pub fn stage1_start() {
    early_println!("[BOOTSTRAP] Starting kernel initialization...");
    early_println!("[BOOTSTRAP] Stage 1: Hardware initialization");
}

pub fn stage1_complete() {
    early_println!("[BOOTSTRAP] Architecture initialized");
}

pub fn stage2_start() {
    early_println!("[BOOTSTRAP] Stage 2: Memory management");
}

pub fn stage2_complete() {
    early_println!("[BOOTSTRAP] Memory management initialized");
}

pub fn stage3_start() {
    early_println!("[BOOTSTRAP] Stage 3: Scheduler activation");
}

pub fn stage3_complete() {
    early_println!("[BOOTSTRAP] Scheduler activated");
}

pub fn stage4_complete() {
    early_println!("[KERNEL] Boot sequence complete!");
    early_println!("BOOTOK");
}
