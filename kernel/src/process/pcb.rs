//! Process Control Block.
//!
//! A `Process` is the per-address-space record; all per-thread state
//! (context, kernel stack, signal-delivery bookkeeping) lives in
//! [`crate::sched::task::Tcb`] instead, owned directly by the scheduler.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::mm::PhysicalAddress;
use crate::process::signal::{SignalAction, NSIG};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const DEFAULT_USER_SPACE_PROCESS_PRIORITY: u8 = crate::sched::task::DEFAULT_USER_SPACE_PROCESS_PRIORITY;

/// A file descriptor's identity in the external VFS layer. The table here
/// only tracks which small integers are in use for this process; the VFS
/// owns what they point to.
pub type OpenFileHandle = u64;

pub struct Process {
    pub pid: ProcessId,
    pub ppid: ProcessId,
    pub priority: u8,
    /// `true` for kernel-owned processes (init, tasks-cleanup's parent).
    pub system: bool,
    /// Physical address of this process's PML4.
    pub cr3: PhysicalAddress,
    pub kernel_stack_base: u64,

    pub name: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,

    pub fds: BTreeMap<i32, OpenFileHandle>,
    pub signal_actions: [SignalAction; NSIG],

    pub children: Vec<ProcessId>,
    pub exit_status: Option<i32>,
    pub alive: bool,
}

impl Process {
    pub fn new(
        pid: ProcessId,
        ppid: ProcessId,
        priority: u8,
        system: bool,
        cr3: PhysicalAddress,
        kernel_stack_base: u64,
        name: String,
    ) -> Self {
        Self {
            pid,
            ppid,
            priority: priority.min(crate::sched::task::MAX_PRIORITY_LEVEL),
            system,
            cr3,
            kernel_stack_base,
            name,
            args: Vec::new(),
            env: Vec::new(),
            working_dir: String::from("/"),
            fds: BTreeMap::new(),
            signal_actions: [SignalAction::default_action(); NSIG],
            children: Vec::new(),
            exit_status: None,
            alive: true,
        }
    }

    /// Deep-copies everything `fork` must duplicate except `cr3` and
    /// `kernel_stack_base`, which the caller fills in once the new address
    /// space and kernel stack exist.
    pub fn fork_from(parent: &Process, child_pid: ProcessId, cr3: PhysicalAddress, kernel_stack_base: u64) -> Self {
        Self {
            pid: child_pid,
            ppid: parent.pid,
            priority: parent.priority,
            system: parent.system,
            cr3,
            kernel_stack_base,
            name: parent.name.clone(),
            args: parent.args.clone(),
            env: parent.env.clone(),
            working_dir: parent.working_dir.clone(),
            fds: parent.fds.clone(),
            signal_actions: parent.signal_actions,
            children: Vec::new(),
            exit_status: None,
            alive: true,
        }
    }

    pub fn add_child(&mut self, pid: ProcessId) {
        self.children.push(pid);
    }

    pub fn remove_child(&mut self, pid: ProcessId) {
        self.children.retain(|&c| c != pid);
    }

    pub fn has_live_child(&self, pid: ProcessId) -> bool {
        self.children.contains(&pid)
    }
}
