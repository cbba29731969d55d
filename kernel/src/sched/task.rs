//! Task control block (C8 data model).
//!
//! A [`Tcb`] is a node in exactly one intrusive list at a time: a
//! per-priority ready ring, a wait queue, the sleep queue, or the killed
//! queue. `prev`/`next` are reused across all four — whichever list
//! currently owns the node.

use crate::arch::x86_64::context::X86_64Context;
use crate::process::ProcessId;

pub type ThreadId = u64;

pub const MAX_PRIORITY_LEVEL: u8 = 9;
pub const DEFAULT_USER_SPACE_PROCESS_PRIORITY: u8 = 5;
pub const TASK_MAX_TIME_SLICE: u64 = 25; // ms, scaled to ticks by the scheduler

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Sleeping,
    WaitingForChild,
    Killed,
}

/// Context saved across a reschedule plus the signal-delivery bookkeeping
/// that rides along with a thread. `prev`/`next` link this node into
/// whichever single intrusive list currently owns it.
pub struct Tcb {
    pub tid: ThreadId,
    pub pid: ProcessId,
    pub context: X86_64Context,
    pub kernel_stack_base: u64,
    pub kernel_stack_size: u64,
    pub state: ThreadState,
    pub priority: u8,
    pub quantum: u64,
    pub wake_at: u64,

    pub signal_mask: u32,
    pub pending_signals: u32,
    pub signal_interruptible: bool,
    pub signal_interrupted: bool,
    pub reblock_after_isr: bool,
    pub old_interrupt_regs: Option<X86_64Context>,
    pub current_sig: Option<u8>,

    /// The [`TaskWaitQueue`](crate::sync::wait_queue::TaskWaitQueue) this
    /// task is currently linked into via `prev`/`next`, if any. Lets signal
    /// delivery cancel an interruptible wait through the owning queue's own
    /// `remove_task` instead of touching `prev`/`next` blind.
    pub wait_queue: Option<core::ptr::NonNull<crate::sync::wait_queue::TaskWaitQueue>>,

    pub prev: *mut Tcb,
    pub next: *mut Tcb,
}

// SAFETY: every `Tcb` is reachable only through scheduler structures guarded
// by the global interrupts lock / spinlocks; raw links never escape those.
unsafe impl Send for Tcb {}

impl Tcb {
    pub fn new(tid: ThreadId, pid: ProcessId, priority: u8, context: X86_64Context, kernel_stack_base: u64, kernel_stack_size: u64) -> Self {
        Self {
            tid,
            pid,
            context,
            kernel_stack_base,
            kernel_stack_size,
            state: ThreadState::Ready,
            priority: priority.min(MAX_PRIORITY_LEVEL),
            quantum: 0,
            wake_at: 0,
            signal_mask: 0,
            pending_signals: 0,
            signal_interruptible: false,
            signal_interrupted: false,
            reblock_after_isr: false,
            old_interrupt_regs: None,
            current_sig: None,
            wait_queue: None,
            prev: core::ptr::null_mut(),
            next: core::ptr::null_mut(),
        }
    }
}
