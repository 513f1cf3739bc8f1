//! ember-vm: an account-based virtual machine for metered DApp execution
//!
//! Untrusted modules pass through the transformation pipeline (`transform`),
//! which shadows host types, wraps exceptions, injects energy and stack
//! accounting, and replaces arrays with wrapper classes. The executor
//! (`executor`) runs transformed artifacts against a persistent object
//! graph (`persistence`) rooted at class statics, with full support for
//! reentrant same-address calls over a caller/callee dual graph.

pub mod bytecode;
pub mod config;
pub mod error;
pub mod executor;
pub mod persistence;
pub mod runtime;
pub mod transform;

pub use crate::config::{EnergySchedule, VmConfig};
pub use crate::error::{StoreError, TransformError, VmError};
pub use crate::executor::avm::{Avm, DeployOutcome};
pub use crate::executor::context::{Address, TransactionContext};
pub use crate::executor::result::{LogEntry, TransactionResult, TransactionStatus};
pub use crate::persistence::store::{GraphStore, InMemoryGraphStore};
pub use crate::runtime::interrupt::Interrupt;
pub use crate::transform::{transform_module, RawModule, TransformedModule};
