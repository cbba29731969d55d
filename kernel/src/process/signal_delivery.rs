//! Signal delivery orchestration (C10 §4.8): the frame-rewrite performed at
//! the syscall/interrupt return-to-user-mode point, and the sigreturn
//! restore that undoes it.
//!
//! [`super::signal`] owns the pure decision logic; this module is the sole
//! reader/writer of [`crate::sched::task::Tcb::old_interrupt_regs`] and is
//! where that decision logic actually touches a thread's saved context.

use crate::arch::x86_64::context::X86_64Context;
use crate::error::{KernelError, KernelResult, SignalError};
use crate::process::signal::{self, DeliveryAction, SaFlags, SignalAction, SignalDisposition};
use crate::sched::scheduler;
use crate::sched::task::Tcb;

/// Signal frame pushed onto the user stack below the interrupted `rsp`.
/// `sigreturn`'s only argument is a pointer to one of these.
#[repr(C)]
struct SignalFrame {
    regs: X86_64Context,
    saved_mask: u32,
    signum: u32,
}

const SIGNAL_FRAME_SIZE: u64 = core::mem::size_of::<SignalFrame>() as u64;

/// Called just before a thread returns to user mode (from the syscall
/// return path or an interrupt return). Delivers at most one signal per
/// call: resolves the lowest-numbered pending, unmasked signal and either
/// clears it (`Ignored`), kills the process (`Terminate`), or rewrites the
/// current context to enter the handler (`Invoke`) and returns.
///
/// Signals resolving to `Ignored` are skipped in a loop so one call can
/// walk past several before hitting one that actually needs delivery or
/// exits early with `Ok(false)` once none remain.
pub fn deliver_pending_signal() -> KernelResult<bool> {
    loop {
        let current = scheduler::current_task();

        let next = unsafe {
            let tcb = current.as_ptr();
            signal::next_deliverable((*tcb).pending_signals, (*tcb).signal_mask)
        };
        let Some(signum) = next else {
            return Ok(false);
        };

        let action = scheduler::with_current_process(|p| p.signal_actions[signum as usize])
            .ok_or(KernelError::InvalidState { expected: "current process", actual: "none" })?;

        unsafe {
            let tcb = current.as_ptr();
            signal::clear_pending(&mut (*tcb).pending_signals, signum);
        }

        return match signal::resolve_delivery(signum, action) {
            DeliveryAction::Ignored => continue,
            DeliveryAction::Terminate { .. } => {
                scheduler::exit_current(128 + signum as i32);
            }
            DeliveryAction::Invoke(action) => {
                build_handler_frame(current, signum, action)?;
                Ok(true)
            }
        };
    }
}

/// Snapshots the interrupted context into `old_interrupt_regs`, pushes a
/// [`SignalFrame`] plus a return address onto the user stack, and rewrites
/// `rip`/`rsp` so the thread enters the handler with `rdi = signum` and
/// `rsi` pointing at the frame. The handler's own `ret` pops the restorer
/// address, which is expected to invoke `sigreturn(rsi)`.
fn build_handler_frame(current: core::ptr::NonNull<Tcb>, signum: u8, action: SignalAction) -> KernelResult<()> {
    let SignalDisposition::Handler(handler) = action.disposition else {
        return Err(KernelError::SignalError(SignalError::CannotCatch { signum }));
    };

    let tcb = current.as_ptr();
    // SAFETY: `current` is the running thread; nothing else touches its
    // context or signal state while we hold the interrupts-disabled window
    // the scheduler already guarantees callers of this function run in.
    unsafe {
        let interrupted = (*tcb).context.clone();
        let old_mask = (*tcb).signal_mask;

        (*tcb).old_interrupt_regs = Some(interrupted.clone());
        (*tcb).current_sig = Some(signum);

        let mut new_mask = old_mask | action.mask;
        if !action.flags.contains(SaFlags::NODEFER) {
            new_mask |= 1 << signum;
        }
        (*tcb).signal_mask = new_mask & !((1 << signal::SIGKILL) | (1 << signal::SIGSTOP));

        let mut sp = interrupted.rsp & !0xF;
        sp -= SIGNAL_FRAME_SIZE;
        let frame_addr = sp;
        core::ptr::write(
            frame_addr as *mut SignalFrame,
            SignalFrame { regs: interrupted, saved_mask: old_mask, signum: signum as u32 },
        );

        sp -= 8;
        core::ptr::write(sp as *mut u64, action.restorer);

        (*tcb).context.rip = handler;
        (*tcb).context.rsp = sp;
        (*tcb).context.rdi = signum as u64;
        (*tcb).context.rsi = frame_addr;
    }
    Ok(())
}

/// Sigreturn: restores the context and signal mask saved by
/// [`build_handler_frame`] from the frame at `frame_ptr`, and clears
/// `current_sig`/`old_interrupt_regs`.
pub fn restore_signal_frame(frame_ptr: u64) -> KernelResult<()> {
    if frame_ptr == 0 || frame_ptr % 8 != 0 {
        return Err(KernelError::InvalidArgument { name: "frame_ptr", value: "null or misaligned" });
    }

    let current = scheduler::current_task();
    unsafe {
        let tcb = current.as_ptr();
        if (*tcb).current_sig.is_none() {
            return Err(KernelError::InvalidState { expected: "signal handler active", actual: "none" });
        }
        let frame = &*(frame_ptr as *const SignalFrame);
        (*tcb).context = frame.regs.clone();
        (*tcb).signal_mask = frame.saved_mask;
        (*tcb).current_sig = None;
        (*tcb).old_interrupt_regs = None;
    }
    Ok(())
}
