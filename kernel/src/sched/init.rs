//! Scheduler bring-up: builds the idle/cleanup kernel threads and arms the
//! preemption timer.

use crate::error::KernelResult;

/// Brings the scheduler online: adopts the boot context as thread 0, spawns
/// the idle and tasks-cleanup kernel threads, then arms the timer that
/// drives preemption.
pub fn init() -> KernelResult<()> {
    println!("[SCHED] Initializing scheduler...");
    super::scheduler::init()?;
    setup_preemption_timer();
    println!("[SCHED] Scheduler initialized");
    Ok(())
}

/// Configures the PIT for a 10ms tick (100Hz), the granularity
/// `timer_tick` uses to drain the sleep queue and decide preemption.
fn setup_preemption_timer() {
    crate::arch::x86_64::timer::setup_timer(10);
    println!("[SCHED] Timer configured for preemptive scheduling");
}
