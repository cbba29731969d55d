//! RAII interrupt-disable guard (C6).
//!
//! On construction disables maskable interrupts; on destruction restores
//! whatever the interrupt flag was before the outermost guard in the current
//! nesting was taken. Nesting is counted so only the outermost guard's drop
//! actually re-enables interrupts — single-CPU, so a plain counter suffices.

use core::sync::atomic::{AtomicU32, AtomicBool, Ordering};

static NEST_COUNT: AtomicU32 = AtomicU32::new(0);
static SAVED_IF: AtomicBool = AtomicBool::new(false);

fn interrupts_enabled() -> bool {
    let flags: u64;
    // SAFETY: `pushfq`/`pop` reads the flags register without side effects.
    unsafe {
        core::arch::asm!("pushfq; pop {}", out(reg) flags);
    }
    flags & (1 << 9) != 0
}

fn disable() {
    // SAFETY: `cli` only affects interrupt delivery on this core.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

fn enable() {
    // SAFETY: `sti` only affects interrupt delivery on this core.
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

/// Disables interrupts for its lifetime. Nested guards are cheap: only the
/// first one observes and restores the pre-existing interrupt-flag state.
pub struct InterruptsLock {
    _private: (),
}

impl InterruptsLock {
    pub fn new() -> Self {
        let was_enabled = interrupts_enabled();
        disable();
        if NEST_COUNT.fetch_add(1, Ordering::Acquire) == 0 {
            SAVED_IF.store(was_enabled, Ordering::Relaxed);
        }
        Self { _private: () }
    }
}

impl Default for InterruptsLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptsLock {
    fn drop(&mut self) {
        if NEST_COUNT.fetch_sub(1, Ordering::Release) == 1 && SAVED_IF.load(Ordering::Relaxed) {
            enable();
        }
    }
}

/// Run `f` with interrupts disabled for the duration, matching the teacher's
/// `without_interrupts` idiom used throughout the console/serial paths.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let _guard = InterruptsLock::new();
    f()
}
