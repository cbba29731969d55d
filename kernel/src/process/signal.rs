//! POSIX-style signal core (C10).
//!
//! This module owns the *data* (signal numbers, per-process dispositions,
//! the pending/mask bitmasks) and the *pure decision logic* (which action a
//! pending signal resolves to, which signal is next in delivery order). The
//! orchestration that actually rewrites an interrupt frame, walks the
//! scheduler's process/thread tables to resolve a pid/tid, or performs the
//! context switch on delivery lives in `sched::scheduler`, which owns those
//! tables per the fork/exec/exit/wait consolidation.

use bitflags::bitflags;

pub const NSIG: usize = 32;

pub const SIGHUP: u8 = 1;
pub const SIGINT: u8 = 2;
pub const SIGQUIT: u8 = 3;
pub const SIGILL: u8 = 4;
pub const SIGTRAP: u8 = 5;
pub const SIGABRT: u8 = 6;
pub const SIGBUS: u8 = 7;
pub const SIGFPE: u8 = 8;
pub const SIGKILL: u8 = 9;
pub const SIGUSR1: u8 = 10;
pub const SIGSEGV: u8 = 11;
pub const SIGUSR2: u8 = 12;
pub const SIGPIPE: u8 = 13;
pub const SIGALRM: u8 = 14;
pub const SIGTERM: u8 = 15;
pub const SIGSTKFLT: u8 = 16;
pub const SIGCHLD: u8 = 17;
pub const SIGCONT: u8 = 18;
pub const SIGSTOP: u8 = 19;
pub const SIGTSTP: u8 = 20;
pub const SIGTTIN: u8 = 21;
pub const SIGTTOU: u8 = 22;
pub const SIGURG: u8 = 23;
pub const SIGXCPU: u8 = 24;
pub const SIGXFSZ: u8 = 25;
pub const SIGVTALRM: u8 = 26;
pub const SIGPROF: u8 = 27;
pub const SIGWINCH: u8 = 28;
pub const SIGIO: u8 = 29;
pub const SIGPWR: u8 = 30;
pub const SIGSYS: u8 = 31;

/// Syscall number reserved for `sigreturn`, per the syscall ABI.
pub const SIGRETURN_SYSCALL: u64 = 0xFFFF;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SaFlags: u32 {
        const ON_STACK   = 1 << 0;
        const RESTART    = 1 << 1;
        const RESETHAND  = 1 << 2;
        const NOCLDSTOP  = 1 << 3;
        const NODEFER    = 1 << 4;
        const NOCLDWAIT  = 1 << 5;
        const SIGINFO    = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDisposition {
    Default,
    Ignore,
    /// User-space address of the handler (`sa_handler`/`sa_sigaction` share
    /// this slot; `SaFlags::SIGINFO` decides which calling convention the
    /// delivery path uses).
    Handler(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalAction {
    pub disposition: SignalDisposition,
    pub mask: u32,
    pub flags: SaFlags,
    pub restorer: u64,
}

impl SignalAction {
    pub const fn default_action() -> Self {
        Self {
            disposition: SignalDisposition::Default,
            mask: 0,
            flags: SaFlags::empty(),
            restorer: 0,
        }
    }
}

impl Default for SignalAction {
    fn default() -> Self {
        Self::default_action()
    }
}

/// What the default disposition actually does for a given signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    Core,
    Ignore,
    Stop,
    Continue,
}

pub fn default_action(signum: u8) -> DefaultAction {
    match signum {
        SIGCHLD | SIGURG | SIGWINCH => DefaultAction::Ignore,
        SIGCONT => DefaultAction::Continue,
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => DefaultAction::Stop,
        SIGQUIT | SIGILL | SIGABRT | SIGFPE | SIGSEGV | SIGBUS | SIGTRAP | SIGSYS | SIGXCPU
        | SIGXFSZ => DefaultAction::Core,
        _ => DefaultAction::Terminate,
    }
}

/// `SIGKILL`/`SIGSTOP` cannot be installed, masked, or ignored.
pub fn is_unblockable(signum: u8) -> bool {
    signum == SIGKILL || signum == SIGSTOP
}

pub fn mark_pending(pending: &mut u32, signum: u8) {
    *pending |= 1 << signum;
}

pub fn clear_pending(pending: &mut u32, signum: u8) {
    *pending &= !(1 << signum);
}

pub fn is_pending(pending: u32, signum: u8) -> bool {
    pending & (1 << signum) != 0
}

/// Lowest-numbered signal in `pending & !mask`, the delivery-point scan
/// order ("for each pending signal in ascending order").
pub fn next_deliverable(pending: u32, mask: u32) -> Option<u8> {
    let eligible = pending & !mask;
    if eligible == 0 {
        return None;
    }
    Some(eligible.trailing_zeros() as u8)
}

#[derive(Debug, Clone, Copy)]
pub enum DeliveryAction {
    /// Clear the pending bit and move on.
    Ignored,
    /// Default Terminate/Core: the caller enqueues the process for kill.
    Terminate { core_dump: bool },
    /// Build a handler frame using this action's restorer/flags.
    Invoke(SignalAction),
}

pub fn resolve_delivery(signum: u8, action: SignalAction) -> DeliveryAction {
    match action.disposition {
        SignalDisposition::Ignore => DeliveryAction::Ignored,
        SignalDisposition::Default => match default_action(signum) {
            DefaultAction::Ignore | DefaultAction::Continue => DeliveryAction::Ignored,
            DefaultAction::Core => DeliveryAction::Terminate { core_dump: true },
            DefaultAction::Terminate | DefaultAction::Stop => {
                DeliveryAction::Terminate { core_dump: false }
            }
        },
        SignalDisposition::Handler(_) => DeliveryAction::Invoke(action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigkill_and_sigstop_are_unblockable() {
        assert!(is_unblockable(SIGKILL));
        assert!(is_unblockable(SIGSTOP));
        assert!(!is_unblockable(SIGTERM));
    }

    #[test]
    fn next_deliverable_picks_lowest_unmasked() {
        let mut pending = 0u32;
        mark_pending(&mut pending, SIGTERM);
        mark_pending(&mut pending, SIGINT);
        assert_eq!(next_deliverable(pending, 0), Some(SIGINT));
        assert_eq!(next_deliverable(pending, 1 << SIGINT), Some(SIGTERM));
        clear_pending(&mut pending, SIGINT);
        clear_pending(&mut pending, SIGTERM);
        assert_eq!(next_deliverable(pending, 0), None);
    }

    #[test]
    fn default_sigchld_is_ignored_not_terminated() {
        let action = SignalAction::default_action();
        match resolve_delivery(SIGCHLD, action) {
            DeliveryAction::Ignored => {}
            other => panic!("expected Ignored, got {:?}", other),
        }
    }

    #[test]
    fn default_sigsegv_terminates_with_core() {
        let action = SignalAction::default_action();
        match resolve_delivery(SIGSEGV, action) {
            DeliveryAction::Terminate { core_dump: true } => {}
            other => panic!("expected core-dumping terminate, got {:?}", other),
        }
    }
}
