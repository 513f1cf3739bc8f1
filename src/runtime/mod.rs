//! Runtime state: values, heap, class metadata, the per-task helper, and
//! the execution control-flow channel.

pub mod builtins;
pub mod heap;
pub mod helper;
pub mod interrupt;
pub mod registry;
pub mod value;

pub use heap::{LoaderState, ObjectHeap, Payload, ShadowObject, EPHEMERAL_ID, STATICS_ROOT_ID};
pub use helper::Helper;
pub use interrupt::{FailureKind, Interrupt};
pub use registry::{ClassId, ClassRegistry, ElemKind, FieldLayout, StaticsLayout};
pub use value::{ObjHandle, ShadowValue};
