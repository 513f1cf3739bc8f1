//! The class-file model
//!
//! A `ClassFile` is the unit the transformation pipeline consumes and
//! produces. Its canonical byte form, the "class bytes" stored in deployed
//! artifacts, is the serde_json encoding, chosen so artifacts stay
//! inspectable and byte-stable across nodes.

use serde::{Deserialize, Serialize};

use crate::bytecode::instr::{ExceptionHandler, Instruction, Intrinsic};
use crate::error::TransformError;

/// One class of a DApp module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassFile {
    /// Internal name, slash form (`com/example/Main`)
    pub name: String,
    /// Internal name of the superclass; `None` only for the shadow root
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    /// Classes that serialize their own payload after the automatic prefix
    pub manual_persistence: bool,
    /// Advisory generics blob; the type-name mapper nulls it out
    pub signature: Option<String>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    /// Synthetic fields are invisible to the persistence protocol
    pub is_synthetic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    pub is_native: bool,
    pub max_locals: u16,
    pub body: MethodBody,
    pub handlers: Vec<ExceptionHandler>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MethodBody {
    Bytecode(Vec<Instruction>),
    /// Runtime-provided body; only synthesized classes carry these
    Intrinsic(Intrinsic),
}

impl ClassFile {
    /// Decode class bytes, mapping any decode failure to `MalformedClass`.
    pub fn parse(name_hint: &str, bytes: &[u8]) -> Result<Self, TransformError> {
        serde_json::from_slice(bytes).map_err(|e| TransformError::MalformedClass {
            name: name_hint.to_string(),
            details: e.to_string(),
        })
    }

    /// Encode to the canonical byte form.
    pub fn to_bytes(&self) -> Vec<u8> {
        // The model contains nothing a serializer can refuse.
        serde_json::to_vec(self).expect("class model is always serializable")
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }
}
