//! Task wait queue (C7): a circular doubly linked list of [`Tcb`] nodes
//! guarded by a spinlock. Every blocking primitive in C9 (`Mutex`,
//! `ConditionVariable`) is built on top of exactly this queue.
//!
//! Ordering is strict FIFO: among waiters enqueued on the same queue,
//! wake-up order equals enqueue order. Fairness across distinct queues is
//! not guaranteed.

use core::ptr::NonNull;

use super::spinlock::Spinlock;
use crate::sched::task::Tcb;

struct WaitQueueState {
    head: *mut Tcb,
}

// SAFETY: every `Tcb` reached through this queue is owned by the scheduler
// and only ever touched with the queue's spinlock held.
unsafe impl Send for WaitQueueState {}

pub struct TaskWaitQueue {
    state: Spinlock<WaitQueueState>,
}

impl TaskWaitQueue {
    pub const fn new() -> Self {
        Self {
            state: Spinlock::new(WaitQueueState { head: core::ptr::null_mut() }),
        }
    }

    /// Appends `task` to the tail of the queue and transitions it to
    /// `blocked`. Does not itself reschedule — callers block the *current*
    /// task and then call `crate::sched::scheduler::reschedule()` themselves,
    /// matching the mutex/condvar suspension sequence.
    pub fn enqueue(&self, task: NonNull<Tcb>) {
        // `block_task` unlinks `task` from the ready ring using the same
        // `prev`/`next` fields this queue is about to claim, so it must run
        // first — linking into our own list before that would have its
        // links immediately clobbered.
        crate::sched::scheduler::block_task(task);
        let mut state = self.state.lock();
        unsafe {
            let node = task.as_ptr();
            (*node).wait_queue = NonNull::new(self as *const Self as *mut Self);
            if state.head.is_null() {
                (*node).prev = node;
                (*node).next = node;
                state.head = node;
            } else {
                let head = state.head;
                let tail = (*head).prev;
                (*tail).next = node;
                (*node).prev = tail;
                (*node).next = head;
                (*head).prev = node;
            }
        }
    }

    /// Removes and unblocks the head of the queue, if any.
    pub fn dequeue(&self) -> Option<NonNull<Tcb>> {
        let mut state = self.state.lock();
        let head = state.head;
        if head.is_null() {
            return None;
        }
        unsafe {
            Self::unlink(&mut state.head, head);
            (*head).wait_queue = None;
        }
        let task = unsafe { NonNull::new_unchecked(head) };
        crate::sched::scheduler::unblock_task(task);
        Some(task)
    }

    /// Drains the whole queue, unblocking every waiter in FIFO order.
    pub fn dequeue_all(&self) {
        while self.dequeue().is_some() {}
    }

    /// Pulls `task` out of the queue wherever it sits and makes it runnable
    /// again, used by signal delivery to cancel an interruptible wait.
    /// No-op if `task` is not currently a member of this queue.
    pub fn remove_task(&self, task: NonNull<Tcb>) {
        let unlinked = {
            let mut state = self.state.lock();
            let node = task.as_ptr();
            let mut found = false;
            unsafe {
                let mut cursor = state.head;
                while !cursor.is_null() {
                    if cursor == node {
                        Self::unlink(&mut state.head, node);
                        (*node).wait_queue = None;
                        found = true;
                        break;
                    }
                    cursor = (*cursor).next;
                    if cursor == state.head {
                        break;
                    }
                }
            }
            found
        };
        if unlinked {
            crate::sched::scheduler::unblock_task(task);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().head.is_null()
    }

    /// # Safety
    /// `node` must currently be a member of the list rooted at `*head`.
    unsafe fn unlink(head: &mut *mut Tcb, node: *mut Tcb) {
        let next = (*node).next;
        let prev = (*node).prev;
        if next == node {
            *head = core::ptr::null_mut();
        } else {
            (*prev).next = next;
            (*next).prev = prev;
            if *head == node {
                *head = next;
            }
        }
        (*node).next = core::ptr::null_mut();
        (*node).prev = core::ptr::null_mut();
    }
}

impl Default for TaskWaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
