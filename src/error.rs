//! Top-level error types for the ember VM
//!
//! Errors are split by phase: `TransformError` covers everything that can go
//! wrong while rewriting untrusted bytecode, `StoreError` covers the object
//! store, and `VmError` is the umbrella returned by the deploy/run facade.
//! Execution-time control flow (energy exhaustion, revert, user throws) is
//! deliberately NOT here; see `runtime::Interrupt`.

use thiserror::Error;

use crate::bytecode::descriptor::DescriptorError;

/// Error variants raised by the bytecode transformation pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    /// Class bytes could not be decoded into the class model
    #[error("Malformed class '{name}': {details}")]
    MalformedClass { name: String, details: String },

    /// An opcode the validator refuses to admit
    #[error("Disallowed opcode {opcode} in {class}.{method}")]
    DisallowedOpcode {
        class: String,
        method: String,
        opcode: String,
    },

    /// Native methods cannot be metered and are rejected outright
    #[error("Native method {class}.{method} is not allowed")]
    NativeMethod { class: String, method: String },

    /// User classes may not claim the runtime's namespaces
    #[error("Class '{class}' uses a reserved package name")]
    ReservedPackage { class: String },

    /// A superclass or interface that is neither in the module nor a runtime type
    #[error("Class '{class}' extends unknown type '{parent}'")]
    UnknownParent { class: String, parent: String },

    /// The parent graph must be a forest
    #[error("Inheritance cycle through class '{class}'")]
    HierarchyCycle { class: String },

    /// Method-handle constants imply dynamic invocation, which is unsupported
    #[error("Method-handle constant in {class}.{method}")]
    MethodHandleConstant { class: String, method: String },

    /// Class constants of array sort are not implemented
    #[error("Array class constant in {class}.{method}")]
    ArrayClassConstant { class: String, method: String },

    /// A branch or handler refers to a label the method never defines
    #[error("Undefined label {label} in {class}.{method}")]
    UndefinedLabel {
        class: String,
        method: String,
        label: u32,
    },

    /// The module does not contain the class it names as its entry
    #[error("Main class '{name}' is not present in the module")]
    MissingMainClass { name: String },

    /// The main class has no static `main()[B` entry point
    #[error("Class '{class}' has no entry point")]
    MissingEntryPoint { class: String },

    /// A field or method descriptor failed to parse
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Error variants raised by the object store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// The environment record must be exactly 12 bytes
    #[error("Environment record has invalid length {length}")]
    BadEnvironmentRecord { length: usize },
}

/// Umbrella error for the deploy/run facade.
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
