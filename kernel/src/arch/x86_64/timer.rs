//! x86_64 timer implementation

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Milliseconds per tick, set by [`setup_timer`]. Defaults to the interval
/// `sched::init` configures (10ms / 100Hz) so timestamps are sane even if
/// queried before the preemption timer is armed.
static TICK_INTERVAL_MS: AtomicU64 = AtomicU64::new(10);

/// Get current timer ticks
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Milliseconds of uptime, derived from the tick count and configured
/// interval. Used by [`crate::log_service`] to timestamp log entries.
pub fn get_timestamp_ms() -> u64 {
    get_ticks() * TICK_INTERVAL_MS.load(Ordering::Relaxed)
}

/// Increment timer ticks (called from timer interrupt)
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);

    // Trigger scheduler tick
    crate::sched::timer_tick();
}

/// Setup timer for periodic interrupts
pub fn setup_timer(interval_ms: u32) {
    // For now, we'll use the PIT (Programmable Interval Timer)
    // In a real implementation, we'd use the APIC timer

    TICK_INTERVAL_MS.store(interval_ms as u64, Ordering::Relaxed);

    const PIT_FREQUENCY: u32 = 1193182; // Hz
    let divisor = PIT_FREQUENCY / (1000 / interval_ms);

    unsafe {
        use x86_64::instructions::port::Port;

        // Command port
        let mut cmd_port: Port<u8> = Port::new(0x43);
        // Channel 0 data port
        let mut data_port: Port<u8> = Port::new(0x40);

        // Configure PIT channel 0 for periodic interrupts
        cmd_port.write(0x36); // Channel 0, lobyte/hibyte, rate generator

        // Set frequency divisor
        data_port.write((divisor & 0xFF) as u8);
        data_port.write((divisor >> 8) as u8);
    }

    // Unmask IRQ0; arch::x86_64::init() masks every line during bring-up so
    // no interrupt fires before the IDT is installed.
    crate::irq::enable_irq(crate::irq::IrqNumber(0)).expect("IRQ manager not initialized");

    println!("[TIMER] Configured PIT for {}ms intervals", interval_ms);
}
