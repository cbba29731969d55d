//! Shared helpers for the kernel's integration test binaries.

use influx_kernel::serial_println;

/// Prints the suite banner. Each `harness = false` binary calls this once
/// from `_start` before running its own test functions in sequence.
pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {} Test Suite ===", subsystem);
}
