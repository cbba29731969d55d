//! Structured kernel error type.
//!
//! Covers the taxonomy in the error-handling design: resource exhaustion
//! from C2/C4/C8, invalid arguments, permission failures, and interrupted
//! operations. Fatal conditions are asserts, not `Result`s — they panic the
//! kernel directly rather than threading an error value back up.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// C2 has no free frames, or C4 has no VMA gap large enough.
    OutOfMemory { requested: usize, available: usize },
    InvalidAddress { addr: usize },
    UnmappedMemory { addr: usize },

    ProcessNotFound { pid: u64 },
    ThreadNotFound { tid: u64 },
    InvalidState { expected: &'static str, actual: &'static str },

    SchedulerError(SchedError),
    SignalError(SignalError),

    InvalidArgument { name: &'static str, value: &'static str },
    PermissionDenied { operation: &'static str },
    ResourceExhausted { resource: &'static str },
    NotFound { resource: &'static str, id: u64 },

    /// A blocking call was interrupted by signal delivery.
    Interrupted,
    /// Subsystem not initialized (called before its `init()`).
    NotInitialized { subsystem: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    InvalidPriority { priority: u8 },
    TaskNotFound { tid: u64 },
    QueueEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    InvalidSignal { signum: u8 },
    CannotCatch { signum: u8 },
    NoEligibleThread,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, available } => {
                write!(f, "out of memory: requested {} bytes, {} available", requested, available)
            }
            Self::InvalidAddress { addr } => write!(f, "invalid address: {:#x}", addr),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at {:#x}", addr),
            Self::ProcessNotFound { pid } => write!(f, "process {} not found", pid),
            Self::ThreadNotFound { tid } => write!(f, "thread {} not found", tid),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {}, got {}", expected, actual)
            }
            Self::SchedulerError(e) => write!(f, "scheduler error: {:?}", e),
            Self::SignalError(e) => write!(f, "signal error: {:?}", e),
            Self::InvalidArgument { name, value } => write!(f, "invalid argument '{}': {}", name, value),
            Self::PermissionDenied { operation } => write!(f, "permission denied for {}", operation),
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {}", resource),
            Self::NotFound { resource, id } => write!(f, "{} {} not found", resource, id),
            Self::Interrupted => write!(f, "operation interrupted by signal"),
            Self::NotInitialized { subsystem } => write!(f, "subsystem not initialized: {}", subsystem),
        }
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedulerError(err)
    }
}

impl From<SignalError> for KernelError {
    fn from(err: SignalError) -> Self {
        Self::SignalError(err)
    }
}
