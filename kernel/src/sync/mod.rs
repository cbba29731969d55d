//! Synchronization primitives (C6–C9): spinlocks and the interrupts-disable
//! guard at the bottom, a task wait queue built on them, and the sleeping
//! Mutex/ConditionVariable/IrqNotifier built on that in turn.

pub mod condvar;
pub mod irq_lock;
pub mod irq_notifier;
pub mod mutex;
pub mod once_lock;
pub mod spinlock;
pub mod wait_queue;

pub use condvar::ConditionVariable;
pub use irq_lock::{without_interrupts, InterruptsLock};
pub use irq_notifier::IrqNotifier;
pub use mutex::{Mutex, MutexGuard};
pub use once_lock::{GlobalState, LazyLock, OnceLock};
pub use spinlock::{Spinlock, SpinlockGuard};
pub use wait_queue::TaskWaitQueue;
