//! Process management.
//!
//! Process/thread *data* lives here ([`pcb::Process`], [`signal`]'s per-pid
//! dispositions); the process *table*, pid/tid allocation, and every
//! lifecycle operation (fork/exec/exit/wait) are owned by
//! [`crate::sched::scheduler`] per the fork/exec/exit/wait consolidation —
//! this module re-exports them so callers spell it `process::fork()` etc.

pub mod pcb;
pub mod signal;
pub mod signal_delivery;

pub use pcb::{Process, ProcessId};
pub use signal_delivery::{deliver_pending_signal, restore_signal_frame};

pub use crate::sched::scheduler::{
    current_pid, exec, exit_current as exit_process, fork, register_process, send_signal,
    wait_for_child, with_current_process, LoadedSegment,
};

/// The calling thread's owning process, for callers that need more than the
/// single field [`with_current_process`] exposes.
pub fn current_process_pid() -> ProcessId {
    current_pid()
}
