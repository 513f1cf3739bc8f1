//! Execution control flow
//!
//! `Interrupt` is the single error channel of the execution engine: metering
//! exhaustion, depth limits, user-requested aborts, in-flight user throws,
//! and the generic catch-all all travel through it with `?`. User handlers
//! can only intercept `Thrown`; every other variant unwinds straight to the
//! executor, which maps it to a result status. Internal assertion failures
//! are not represented here; those terminate the process.

use thiserror::Error;

use crate::runtime::value::ObjHandle;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    #[error("Out of energy")]
    OutOfEnergy,

    #[error("Frame depth limit exceeded")]
    OutOfStack,

    #[error("Call depth limit exceeded")]
    CallDepthExceeded,

    #[error("Execution reverted")]
    Revert,

    #[error("Execution declared invalid")]
    Invalid,

    #[error("Task aborted")]
    Abort,

    /// A user exception in flight; the handle is the thrown shadow object
    #[error("User exception in flight")]
    Thrown(ObjHandle),

    /// Catch-all VM failure; carries no user-visible detail
    #[error("VM failure")]
    Failure(FailureKind),
}

/// Coarse classification for the catch-all, kept for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    TypeMismatch,
    UnresolvedSymbol,
    CorruptStore,
    OperandUnderflow,
}
