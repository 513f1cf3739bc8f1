//! The DApp bytecode language: class model, instruction set, descriptors.

pub mod class;
pub mod descriptor;
pub mod instr;

pub use class::{ClassFile, FieldDef, MethodBody, MethodDef};
pub use descriptor::FieldType;
pub use instr::{
    Cond, Const, ExceptionHandler, FieldRef, Instruction, Intrinsic, InvokeKind, Label, MethodRef,
};
