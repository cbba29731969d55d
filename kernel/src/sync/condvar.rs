//! Condition variable (C9), built on [`TaskWaitQueue`] (C7) exactly like
//! [`super::mutex::Mutex`] is.

use super::mutex::MutexGuard;
use super::wait_queue::TaskWaitQueue;
use crate::sched::scheduler;

pub struct ConditionVariable {
    wait_queue: TaskWaitQueue,
}

impl ConditionVariable {
    pub const fn new() -> Self {
        Self { wait_queue: TaskWaitQueue::new() }
    }

    /// Atomically releases `guard`'s mutex and blocks, re-acquiring the
    /// mutex before returning.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex();
        let current = scheduler::current_task();
        self.wait_queue.enqueue(current);
        drop(guard);
        scheduler::reschedule();
        mutex.lock()
    }

    /// Interruptible variant: marks the current task `signal_interruptible`
    /// before blocking. Returns `None` if a signal cancelled the wait (the
    /// mutex is left unlocked in that case, matching `guard` being
    /// consumed); returns the re-acquired guard otherwise.
    pub fn wait_interruptible<'a, T>(&self, guard: MutexGuard<'a, T>) -> Option<MutexGuard<'a, T>> {
        let mutex = guard.mutex();
        let current = scheduler::current_task();
        unsafe {
            (*current.as_ptr()).signal_interruptible = true;
        }
        self.wait_queue.enqueue(current);
        drop(guard);
        scheduler::reschedule();

        let interrupted = unsafe { (*current.as_ptr()).signal_interrupted };
        unsafe {
            (*current.as_ptr()).signal_interruptible = false;
        }
        if interrupted {
            unsafe {
                (*current.as_ptr()).signal_interrupted = false;
            }
            self.wait_queue.remove_task(current);
            return None;
        }
        Some(mutex.lock())
    }

    pub fn notify_one(&self) {
        self.wait_queue.dequeue();
    }

    pub fn notify_all(&self) {
        self.wait_queue.dequeue_all();
    }
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}
