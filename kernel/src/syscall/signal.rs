//! Signal-related system calls (C10's only syscall-surface touchpoints):
//! - `sys_sigaction` (120): Install or query a signal handler
//! - `sys_sigprocmask` (121): Block/unblock signals
//! - `sys_sigsuspend` (122): Atomically set mask and suspend
//! - `sys_sigreturn` (123): Return from signal trampoline

use super::{validate_user_ptr_typed, SyscallError, SyscallResult};
use crate::process;
use crate::process::signal::{self, SaFlags, SignalAction, SignalDisposition};
use crate::sched::scheduler;
use crate::sync::irq_lock::without_interrupts;

// ============================================================================
// Signal action flags (matching POSIX sa_flags)
// ============================================================================

/// Restart interrupted syscalls automatically.
pub const SA_RESTART: u32 = 0x1000_0000;
/// Do not generate SIGCHLD when children stop.
pub const SA_NOCLDSTOP: u32 = 0x0000_0001;
/// Use sa_sigaction instead of sa_handler.
pub const SA_SIGINFO: u32 = 0x0000_0004;
/// Use alternate signal stack (sigaltstack).
pub const SA_ONSTACK: u32 = 0x0800_0000;
/// Reset handler to SIG_DFL on entry.
pub const SA_RESETHAND: u32 = 0x8000_0000;
/// Do not add signal to mask during handler.
pub const SA_NODEFER: u32 = 0x4000_0000;
/// Do not create zombie children.
pub const SA_NOCLDWAIT: u32 = 0x0000_0002;

// ============================================================================
// Signal mask operations
// ============================================================================

/// How to modify the signal mask in sigprocmask.
pub const SIG_BLOCK: usize = 0;
/// Unblock signals in the provided set.
pub const SIG_UNBLOCK: usize = 1;
/// Replace the mask entirely.
pub const SIG_SETMASK: usize = 2;

/// Default signal handler (terminate process).
pub const SIG_DFL: usize = 0;
/// Ignore the signal.
pub const SIG_IGN: usize = 1;

// ============================================================================
// User-space signal action structure (repr(C) for ABI stability)
// ============================================================================

/// Mirrors the POSIX `struct sigaction` layout expected by user space.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SigAction {
    /// Signal handler function pointer (or SIG_DFL / SIG_IGN).
    pub sa_handler: usize,
    /// Signal mask to apply during handler execution.
    pub sa_mask: u64,
    /// Flags (SA_RESTART, SA_SIGINFO, etc.).
    pub sa_flags: u32,
    /// Padding for alignment.
    pub _pad: u32,
    /// Optional restorer function (used by the kernel to inject sigreturn).
    pub sa_restorer: usize,
}

fn sa_flags_from_abi(bits: u32) -> SaFlags {
    let mut flags = SaFlags::empty();
    if bits & SA_ONSTACK != 0 {
        flags |= SaFlags::ON_STACK;
    }
    if bits & SA_RESTART != 0 {
        flags |= SaFlags::RESTART;
    }
    if bits & SA_RESETHAND != 0 {
        flags |= SaFlags::RESETHAND;
    }
    if bits & SA_NOCLDSTOP != 0 {
        flags |= SaFlags::NOCLDSTOP;
    }
    if bits & SA_NODEFER != 0 {
        flags |= SaFlags::NODEFER;
    }
    if bits & SA_NOCLDWAIT != 0 {
        flags |= SaFlags::NOCLDWAIT;
    }
    if bits & SA_SIGINFO != 0 {
        flags |= SaFlags::SIGINFO;
    }
    flags
}

fn sa_flags_to_abi(flags: SaFlags) -> u32 {
    let mut bits = 0u32;
    if flags.contains(SaFlags::ON_STACK) {
        bits |= SA_ONSTACK;
    }
    if flags.contains(SaFlags::RESTART) {
        bits |= SA_RESTART;
    }
    if flags.contains(SaFlags::RESETHAND) {
        bits |= SA_RESETHAND;
    }
    if flags.contains(SaFlags::NOCLDSTOP) {
        bits |= SA_NOCLDSTOP;
    }
    if flags.contains(SaFlags::NODEFER) {
        bits |= SA_NODEFER;
    }
    if flags.contains(SaFlags::NOCLDWAIT) {
        bits |= SA_NOCLDWAIT;
    }
    if flags.contains(SaFlags::SIGINFO) {
        bits |= SA_SIGINFO;
    }
    bits
}

fn disposition_from_handler(sa_handler: usize) -> SignalDisposition {
    match sa_handler {
        SIG_DFL => SignalDisposition::Default,
        SIG_IGN => SignalDisposition::Ignore,
        addr => SignalDisposition::Handler(addr as u64),
    }
}

fn disposition_to_handler(disposition: SignalDisposition) -> usize {
    match disposition {
        SignalDisposition::Default => SIG_DFL,
        SignalDisposition::Ignore => SIG_IGN,
        SignalDisposition::Handler(addr) => addr as usize,
    }
}

// ============================================================================
// Syscall implementations
// ============================================================================

/// Install or query a signal handler (syscall 120).
///
/// # Arguments
/// - `signum`: Signal number (1-31).
/// - `act_ptr`: Pointer to new `SigAction` (0 to query only).
/// - `oldact_ptr`: Pointer to receive previous `SigAction` (0 to skip).
pub fn sys_sigaction(signum: usize, act_ptr: usize, oldact_ptr: usize) -> SyscallResult {
    if signum == 0 || signum >= signal::NSIG {
        return Err(SyscallError::InvalidArgument);
    }
    let signum = signum as u8;
    if signal::is_unblockable(signum) {
        return Err(SyscallError::PermissionDenied);
    }

    if act_ptr != 0 {
        validate_user_ptr_typed::<SigAction>(act_ptr)?;
    }
    if oldact_ptr != 0 {
        validate_user_ptr_typed::<SigAction>(oldact_ptr)?;
    }

    let old = process::with_current_process(|p| p.signal_actions[signum as usize])
        .ok_or(SyscallError::InvalidState)?;

    if oldact_ptr != 0 {
        // SAFETY: oldact_ptr was validated as non-null, in user-space, and
        // aligned for SigAction above.
        unsafe {
            let old_act = oldact_ptr as *mut SigAction;
            (*old_act).sa_handler = disposition_to_handler(old.disposition);
            (*old_act).sa_mask = old.mask as u64;
            (*old_act).sa_flags = sa_flags_to_abi(old.flags);
            (*old_act)._pad = 0;
            (*old_act).sa_restorer = old.restorer as usize;
        }
    }

    if act_ptr != 0 {
        // SAFETY: act_ptr was validated as non-null, in user-space, and
        // aligned for SigAction above.
        let new_act = unsafe { *(act_ptr as *const SigAction) };
        let action = SignalAction {
            disposition: disposition_from_handler(new_act.sa_handler),
            mask: new_act.sa_mask as u32,
            flags: sa_flags_from_abi(new_act.sa_flags),
            restorer: new_act.sa_restorer as u64,
        };
        process::with_current_process(|p| p.signal_actions[signum as usize] = action)
            .ok_or(SyscallError::InvalidState)?;
    }

    Ok(0)
}

/// Block, unblock, or set the calling thread's signal mask (syscall 121).
///
/// # Arguments
/// - `how`: SIG_BLOCK, SIG_UNBLOCK, or SIG_SETMASK.
/// - `set_ptr`: Pointer to the new mask bits (u64). 0 to query only.
/// - `oldset_ptr`: Pointer to receive the previous mask (u64). 0 to skip.
pub fn sys_sigprocmask(how: usize, set_ptr: usize, oldset_ptr: usize) -> SyscallResult {
    let current = scheduler::current_task();
    let old_mask = without_interrupts(|| unsafe { (*current.as_ptr()).signal_mask });

    if oldset_ptr != 0 {
        validate_user_ptr_typed::<u64>(oldset_ptr)?;
        // SAFETY: oldset_ptr was validated as non-null, in user-space, and
        // aligned for u64 above.
        unsafe {
            *(oldset_ptr as *mut u64) = old_mask as u64;
        }
    }

    if set_ptr != 0 {
        validate_user_ptr_typed::<u64>(set_ptr)?;
        // SAFETY: set_ptr was validated as non-null, in user-space, and
        // aligned for u64 above.
        let new_bits = unsafe { *(set_ptr as *const u64) } as u32;

        let updated_mask = match how {
            SIG_BLOCK => old_mask | new_bits,
            SIG_UNBLOCK => old_mask & !new_bits,
            SIG_SETMASK => new_bits,
            _ => return Err(SyscallError::InvalidArgument),
        };

        let sanitized = updated_mask & !((1u32 << signal::SIGKILL) | (1u32 << signal::SIGSTOP));
        without_interrupts(|| unsafe { (*current.as_ptr()).signal_mask = sanitized });
    }

    Ok(0)
}

/// Atomically set signal mask and suspend until a signal arrives (syscall 122).
///
/// Saves the current signal mask, replaces it with the provided mask, then
/// blocks interruptibly. When a non-blocked signal arrives the original
/// mask is restored and the syscall returns `Interrupted`, per POSIX.
///
/// # Arguments
/// - `mask_ptr`: Pointer to the temporary signal mask (u64).
pub fn sys_sigsuspend(mask_ptr: usize) -> SyscallResult {
    if mask_ptr == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    validate_user_ptr_typed::<u64>(mask_ptr)?;
    // SAFETY: mask_ptr was validated above.
    let temp_mask = unsafe { *(mask_ptr as *const u64) } as u32;
    let sanitized_temp = temp_mask & !((1u32 << signal::SIGKILL) | (1u32 << signal::SIGSTOP));

    let current = scheduler::current_task();
    let old_mask = without_interrupts(|| unsafe {
        let tcb = current.as_ptr();
        let old = (*tcb).signal_mask;
        (*tcb).signal_mask = sanitized_temp;
        old
    });

    loop {
        let deliverable = without_interrupts(|| unsafe {
            let tcb = current.as_ptr();
            signal::next_deliverable((*tcb).pending_signals, (*tcb).signal_mask)
        });
        if deliverable.is_some() {
            break;
        }

        without_interrupts(|| unsafe { (*current.as_ptr()).signal_interruptible = true });
        scheduler::block_current_task();
        scheduler::reschedule();
        without_interrupts(|| unsafe {
            (*current.as_ptr()).signal_interruptible = false;
            (*current.as_ptr()).signal_interrupted = false;
        });
    }

    without_interrupts(|| unsafe { (*current.as_ptr()).signal_mask = old_mask });
    Err(SyscallError::Interrupted)
}

/// Return from a signal handler trampoline (syscall 123).
///
/// # Arguments
/// - `frame_ptr`: Pointer to the saved signal frame on the user stack.
pub fn sys_sigreturn(frame_ptr: usize) -> SyscallResult {
    process::restore_signal_frame(frame_ptr as u64).map_err(|_| SyscallError::InvalidArgument)?;
    Ok(0)
}

/// Delivers the next pending, unmasked signal if one exists. Called from
/// the syscall-return/interrupt-return path, just before resuming user
/// mode.
///
/// # Returns
/// - `Ok(1)` if a signal was delivered (thread context rewritten to enter
///   the handler).
/// - `Ok(0)` if no deliverable signal was pending.
pub fn check_pending_signals() -> SyscallResult {
    match process::deliver_pending_signal() {
        Ok(delivered) => Ok(if delivered { 1 } else { 0 }),
        Err(_) => Ok(0),
    }
}
