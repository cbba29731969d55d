//! Test-and-set spinlock (C6).
//!
//! Busy-spins on a compare-and-swap of a `u32` from 0 to 1. The kernel never
//! holds a spinlock across a reschedule — callers that need to sleep use
//! [`super::wait_queue::TaskWaitQueue`] instead.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

pub struct Spinlock<T> {
    state: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: `Spinlock<T>` serializes all access to `data` through the atomic
// `state`, so sharing it across contexts is sound whenever `T: Send`.
unsafe impl<T: Send> Sync for Spinlock<T> {}

pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        while self
            .state
            .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        SpinlockGuard { lock: self }
    }

    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinlockGuard { lock: self })
    }

    /// # Safety
    /// The caller must hold the lock exactly once and not use the guard
    /// after this call.
    unsafe fn unlock(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }
}

impl<T> core::ops::Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard proves exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> core::ops::DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard proves exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: this guard is the sole holder of the lock.
        unsafe { self.lock.unlock() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes_try_lock() {
        let lock = Spinlock::new(0);
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn guard_mutates_inner_value() {
        let lock = Spinlock::new(10);
        *lock.lock() += 5;
        assert_eq!(*lock.lock(), 15);
    }
}
