//! Preemptive scheduler (C8): per-priority ready rings, a sleep queue, fork
//! and exec, and process lifecycle (exit/wait-for-child/signal delivery
//! wake-ups).

pub mod init;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use init::init;
pub use scheduler::{
    block_current_task, block_task, current_pid, current_process_priority, current_task,
    exec, exit_current, fork, register_process, reschedule, send_signal, sleep, thread_priority_bound,
    timer_tick, unblock_task, wait_for_child, with_current_process, yield_cpu, LoadedSegment,
};
pub use task::{Tcb, ThreadId, ThreadState};
