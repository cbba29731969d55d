//! Thin re-export layer over the x86_64 context-switch implementation.
//!
//! Kept as its own module (rather than having callers reach into
//! `arch::x86_64::context` directly) so the scheduler's imports read the
//! same way they would in a multi-architecture build.

pub use crate::arch::x86_64::context::{
    init_fpu, restore_fpu_state, save_fpu_state, switch_context, FpuState, X86_64Context,
};
