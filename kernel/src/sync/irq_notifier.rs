//! Edge-triggered single-waiter notifier (C9), used by ATA IRQ handlers to
//! hand a completion off to the task blocked waiting for it.
//!
//! Guarded only by disabling interrupts, not a spinlock: `notify` runs from
//! IRQ context, which on this single CPU already can't race `wait`'s own
//! interrupts-disabled section.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use super::irq_lock::without_interrupts;
use crate::sched::scheduler;
use crate::sched::task::Tcb;

struct State {
    notified: bool,
    task: Option<NonNull<Tcb>>,
}

pub struct IrqNotifier {
    state: UnsafeCell<State>,
}

// SAFETY: every access to `state` happens inside `without_interrupts`.
unsafe impl Sync for IrqNotifier {}

impl IrqNotifier {
    pub const fn new() -> Self {
        Self { state: UnsafeCell::new(State { notified: false, task: None }) }
    }

    /// Blocks until the next `notify`, or returns immediately if one already
    /// happened (edge already latched).
    pub fn wait(&self) {
        let already_notified = without_interrupts(|| unsafe {
            let state = &mut *self.state.get();
            if state.notified {
                state.notified = false;
                true
            } else {
                state.task = Some(scheduler::current_task());
                false
            }
        });
        if already_notified {
            return;
        }
        scheduler::block_current_task();
        scheduler::reschedule();
    }

    /// Mirrors [`super::condvar::ConditionVariable::wait_interruptible`]:
    /// returns `false` if a signal cancelled the wait instead of `notify`.
    pub fn wait_interruptible(&self) -> bool {
        let already_notified = without_interrupts(|| unsafe {
            let current = scheduler::current_task();
            let state = &mut *self.state.get();
            if state.notified {
                state.notified = false;
                true
            } else {
                state.task = Some(current);
                (*current.as_ptr()).signal_interruptible = true;
                false
            }
        });
        if already_notified {
            return true;
        }

        scheduler::block_current_task();
        scheduler::reschedule();

        without_interrupts(|| unsafe {
            let current = scheduler::current_task();
            (*current.as_ptr()).signal_interruptible = false;
            let interrupted = (*current.as_ptr()).signal_interrupted;
            if interrupted {
                (*current.as_ptr()).signal_interrupted = false;
                (&mut *self.state.get()).task = None;
            }
            !interrupted
        })
    }

    /// Called from IRQ context: wakes the waiter if there is one, otherwise
    /// latches the edge for the next `wait`.
    pub fn notify(&self) {
        without_interrupts(|| unsafe {
            let state = &mut *self.state.get();
            match state.task.take() {
                Some(task) => scheduler::unblock_task(task),
                None => state.notified = true,
            }
        });
    }
}

impl Default for IrqNotifier {
    fn default() -> Self {
        Self::new()
    }
}
