//! Array wrapping
//!
//! Host arrays cannot be metered or persisted, so every array type is
//! replaced by a synthesized wrapper class: descriptors mentioning `[X`
//! become references to `ember/arrays/...`, and `newarray` becomes a charged
//! construction call on the wrapper. Wrappers are manual-persistence classes
//! whose element payload travels through the same protocol as any other
//! shadow object.

use std::collections::BTreeSet;

use crate::bytecode::instr::{ExceptionHandler, Instruction, InvokeKind, MethodRef};
use crate::bytecode::{ClassFile, FieldRef, Intrinsic, MethodBody, MethodDef};
use crate::error::TransformError;
use crate::transform::metering;

pub const ARRAY_PACKAGE: &str = "ember/arrays/";

/// The wrapper class replacing an array of the given element descriptor.
pub fn wrapper_name(elem_descriptor: &str) -> &'static str {
    match elem_descriptor.as_bytes().first() {
        Some(b'Z') => "ember/arrays/BoolArray",
        Some(b'B') => "ember/arrays/ByteArray",
        Some(b'S') => "ember/arrays/ShortArray",
        Some(b'C') => "ember/arrays/CharArray",
        Some(b'I') => "ember/arrays/IntArray",
        Some(b'J') => "ember/arrays/LongArray",
        Some(b'F') => "ember/arrays/FloatArray",
        Some(b'D') => "ember/arrays/DoubleArray",
        // Reference and nested-array elements share the object wrapper.
        _ => "ember/arrays/ObjectArray",
    }
}

/// Rewrite one class, recording every wrapper the module will need.
pub fn rewrite_arrays(
    mut class: ClassFile,
    needed: &mut BTreeSet<String>,
) -> Result<ClassFile, TransformError> {
    for field in &mut class.fields {
        field.descriptor = map_descriptor(&field.descriptor, needed)?;
    }
    for method in &mut class.methods {
        method.descriptor = map_descriptor(&method.descriptor, needed)?;
        if let MethodBody::Bytecode(code) = &mut method.body {
            *code = rewrite_code(std::mem::take(code), needed)?;
        }
    }
    Ok(class)
}

fn rewrite_code(
    code: Vec<Instruction>,
    needed: &mut BTreeSet<String>,
) -> Result<Vec<Instruction>, TransformError> {
    let mut out = Vec::with_capacity(code.len());
    for instr in code {
        match instr {
            Instruction::NewArray(elem) => {
                let wrapper = wrapper_name(&elem);
                needed.insert(wrapper.to_string());
                // The construction path charges header + length x element
                // size before the wrapper materializes.
                out.push(Instruction::ChargeArrayAllocation(metering::element_size(
                    &elem,
                )));
                out.push(Instruction::Invoke(
                    InvokeKind::Static,
                    MethodRef {
                        owner: wrapper.to_string(),
                        name: "init".to_string(),
                        descriptor: format!("(I)L{};", wrapper),
                    },
                ));
            }
            Instruction::GetField(r) => out.push(Instruction::GetField(map_field_ref(r, needed)?)),
            Instruction::PutField(r) => out.push(Instruction::PutField(map_field_ref(r, needed)?)),
            Instruction::GetStatic(r) => {
                out.push(Instruction::GetStatic(map_field_ref(r, needed)?))
            }
            Instruction::PutStatic(r) => {
                out.push(Instruction::PutStatic(map_field_ref(r, needed)?))
            }
            Instruction::Invoke(kind, r) => {
                let owner = if r.owner.starts_with('[') {
                    let wrapper = wrapper_name(&r.owner[1..]);
                    needed.insert(wrapper.to_string());
                    wrapper.to_string()
                } else {
                    r.owner
                };
                out.push(Instruction::Invoke(
                    kind,
                    MethodRef {
                        owner,
                        name: r.name,
                        descriptor: map_descriptor(&r.descriptor, needed)?,
                    },
                ));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn map_field_ref(
    r: FieldRef,
    needed: &mut BTreeSet<String>,
) -> Result<FieldRef, TransformError> {
    Ok(FieldRef {
        owner: r.owner,
        name: r.name,
        descriptor: map_descriptor(&r.descriptor, needed)?,
    })
}

/// Token-by-token descriptor walk replacing `[elem` with the wrapper ref.
fn map_descriptor(
    descriptor: &str,
    needed: &mut BTreeSet<String>,
) -> Result<String, TransformError> {
    let mut out = String::with_capacity(descriptor.len());
    let mut from = 0;
    while from < descriptor.len() {
        from = map_token(descriptor, from, &mut out, needed)?;
    }
    Ok(out)
}

fn map_token(
    descriptor: &str,
    from: usize,
    out: &mut String,
    needed: &mut BTreeSet<String>,
) -> Result<usize, TransformError> {
    let malformed = || {
        TransformError::MalformedClass {
            name: String::new(),
            details: format!("bad descriptor '{}'", descriptor),
        }
    };
    let c = *descriptor.as_bytes().get(from).ok_or_else(malformed)? as char;
    match c {
        'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' | 'V' => {
            out.push(c);
            Ok(from + 1)
        }
        'L' => {
            let semi = descriptor[from..].find(';').ok_or_else(malformed)? + from;
            out.push_str(&descriptor[from..=semi]);
            Ok(semi + 1)
        }
        '[' => {
            let wrapper = wrapper_name(&descriptor[from + 1..]);
            needed.insert(wrapper.to_string());
            out.push('L');
            out.push_str(wrapper);
            out.push(';');
            // Skip the element token without emitting it.
            let mut scratch = String::new();
            let mut throwaway = BTreeSet::new();
            map_token(descriptor, from + 1, &mut scratch, &mut throwaway)
        }
        '(' => {
            let close = descriptor[from..].find(')').ok_or_else(malformed)? + from;
            out.push('(');
            let mut inner = from + 1;
            while inner < close {
                inner = map_token(descriptor, inner, out, needed)?;
            }
            out.push(')');
            Ok(close + 1)
        }
        _ => Err(malformed()),
    }
}

/// Synthesize the wrapper class for the given name.
pub fn generate_wrapper(name: &str) -> ClassFile {
    let intrinsic = |method: &str, descriptor: String, is_static: bool, body: Intrinsic| MethodDef {
        name: method.to_string(),
        descriptor,
        is_static,
        is_native: false,
        max_locals: 0,
        body: MethodBody::Intrinsic(body),
        handlers: Vec::<ExceptionHandler>::new(),
    };
    ClassFile {
        name: name.to_string(),
        superclass: Some("ember/lang/Object".to_string()),
        interfaces: vec![],
        is_interface: false,
        manual_persistence: true,
        signature: None,
        fields: vec![],
        methods: vec![
            intrinsic("init", format!("(I)L{};", name), true, Intrinsic::ArrayInit),
            intrinsic("em_length", "()I".to_string(), false, Intrinsic::ArrayLength),
            intrinsic(
                "em_get",
                "(I)Lember/lang/Object;".to_string(),
                false,
                Intrinsic::ArrayGet,
            ),
            intrinsic(
                "em_set",
                "(ILember/lang/Object;)V".to_string(),
                false,
                Intrinsic::ArraySet,
            ),
            intrinsic(
                "em_hashCode",
                "()I".to_string(),
                false,
                Intrinsic::ArrayHashCode,
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_names() {
        assert_eq!(wrapper_name("B"), "ember/arrays/ByteArray");
        assert_eq!(wrapper_name("J"), "ember/arrays/LongArray");
        assert_eq!(wrapper_name("Lapp/Node;"), "ember/arrays/ObjectArray");
        assert_eq!(wrapper_name("[B"), "ember/arrays/ObjectArray");
    }

    #[test]
    fn test_descriptor_mapping() {
        let mut needed = BTreeSet::new();
        let mapped = map_descriptor("([BI)[Lapp/Node;", &mut needed).unwrap();
        assert_eq!(mapped, "(Lember/arrays/ByteArray;I)Lember/arrays/ObjectArray;");
        assert!(needed.contains("ember/arrays/ByteArray"));
        assert!(needed.contains("ember/arrays/ObjectArray"));
    }

    #[test]
    fn test_nested_array_maps_to_object_wrapper() {
        let mut needed = BTreeSet::new();
        let mapped = map_descriptor("[[B", &mut needed).unwrap();
        assert_eq!(mapped, "Lember/arrays/ObjectArray;");
    }

    #[test]
    fn test_newarray_becomes_charged_init_call() {
        let mut needed = BTreeSet::new();
        let code = rewrite_code(vec![Instruction::NewArray("B".to_string())], &mut needed).unwrap();
        assert_eq!(code[0], Instruction::ChargeArrayAllocation(1));
        match &code[1] {
            Instruction::Invoke(InvokeKind::Static, r) => {
                assert_eq!(r.owner, "ember/arrays/ByteArray");
                assert_eq!(r.name, "init");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_generated_wrapper_shape() {
        let wrapper = generate_wrapper("ember/arrays/ByteArray");
        assert!(wrapper.manual_persistence);
        assert!(wrapper.method("init").is_some());
        assert!(wrapper.method("em_length").is_some());
    }
}
