//! Type-name mapping: host runtime types into the shadow namespace
//!
//! Every reference to a type under the host root is redirected to the
//! metered shadow implementation, method names on host owners gain the
//! reserved prefix, and descriptors are rewritten token by token so both
//! parameter and return positions move together. String and class constants
//! are chased with a wrapping call so user code only ever holds shadow
//! instances. Generic signature attributes are advisory and dropped.

use crate::bytecode::instr::{Const, Instruction, MethodRef};
use crate::bytecode::{descriptor, ClassFile, FieldRef, MethodBody};
use crate::error::TransformError;

pub const HOST_LANG: &str = "host/lang";
pub const SHADOW_LANG: &str = "ember/lang";
pub const METHOD_PREFIX: &str = "em_";

const CONSTRUCTOR: &str = "<init>";
const CLASS_INITIALIZER: &str = "<clinit>";

/// Redirect a host-rooted internal name into the shadow namespace.
pub fn map_type(name: &str) -> String {
    match name.strip_prefix(HOST_LANG) {
        Some(rest) => format!("{}{}", SHADOW_LANG, rest),
        None => name.to_string(),
    }
}

/// Prefix method names on host owners, preserving constructor sentinels.
fn map_method_name(owner: &str, name: &str) -> String {
    if owner.starts_with(HOST_LANG) && name != CONSTRUCTOR && name != CLASS_INITIALIZER {
        format!("{}{}", METHOD_PREFIX, name)
    } else {
        name.to_string()
    }
}

fn map_descriptor(d: &str) -> Result<String, TransformError> {
    Ok(descriptor::rewrite(d, &|n: &str| map_type(n))?)
}

/// Rewrite one class. The class's own name is left alone; user classes keep
/// their identity; only their references into the host root move.
pub fn rewrite_class(mut class: ClassFile) -> Result<ClassFile, TransformError> {
    class.signature = None;
    class.superclass = class.superclass.as_deref().map(map_type);
    class.interfaces = class.interfaces.iter().map(|i| map_type(i)).collect();

    for field in &mut class.fields {
        field.descriptor = map_descriptor(&field.descriptor)?;
    }

    let class_name = class.name.clone();
    for method in &mut class.methods {
        method.descriptor = map_descriptor(&method.descriptor)?;
        for handler in &mut method.handlers {
            handler.catch_type = handler.catch_type.as_deref().map(map_type);
        }
        let method_name = method.name.clone();
        if let MethodBody::Bytecode(code) = &mut method.body {
            *code = rewrite_code(&class_name, &method_name, std::mem::take(code))?;
        }
    }
    Ok(class)
}

fn rewrite_code(
    class: &str,
    method: &str,
    code: Vec<Instruction>,
) -> Result<Vec<Instruction>, TransformError> {
    let mut out = Vec::with_capacity(code.len());
    for instr in code {
        match instr {
            Instruction::Const(Const::Str(s)) => {
                out.push(Instruction::Const(Const::Str(s)));
                out.push(Instruction::WrapString);
            }
            Instruction::Const(Const::ClassRef(name)) => {
                if name.starts_with('[') {
                    return Err(TransformError::ArrayClassConstant {
                        class: class.to_string(),
                        method: method.to_string(),
                    });
                }
                out.push(Instruction::Const(Const::ClassRef(map_type(&name))));
                out.push(Instruction::WrapClassRef);
            }
            Instruction::Const(Const::MethodHandle(_)) => {
                return Err(TransformError::MethodHandleConstant {
                    class: class.to_string(),
                    method: method.to_string(),
                })
            }
            Instruction::InvokeDynamic(_) => {
                return Err(TransformError::DisallowedOpcode {
                    class: class.to_string(),
                    method: method.to_string(),
                    opcode: "invokedynamic".to_string(),
                })
            }
            Instruction::New(name) => out.push(Instruction::New(map_type(&name))),
            Instruction::NewArray(elem) => {
                out.push(Instruction::NewArray(map_descriptor(&elem)?))
            }
            Instruction::GetField(r) => out.push(Instruction::GetField(map_field_ref(r)?)),
            Instruction::PutField(r) => out.push(Instruction::PutField(map_field_ref(r)?)),
            Instruction::GetStatic(r) => out.push(Instruction::GetStatic(map_field_ref(r)?)),
            Instruction::PutStatic(r) => out.push(Instruction::PutStatic(map_field_ref(r)?)),
            Instruction::Invoke(kind, r) => {
                out.push(Instruction::Invoke(kind, map_method_ref(r)?))
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn map_field_ref(r: FieldRef) -> Result<FieldRef, TransformError> {
    Ok(FieldRef {
        owner: map_type(&r.owner),
        name: r.name,
        descriptor: map_descriptor(&r.descriptor)?,
    })
}

fn map_method_ref(r: MethodRef) -> Result<MethodRef, TransformError> {
    let name = map_method_name(&r.owner, &r.name);
    Ok(MethodRef {
        owner: map_type(&r.owner),
        name,
        descriptor: map_descriptor(&r.descriptor)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instr::InvokeKind;
    use crate::bytecode::{FieldDef, MethodDef};

    fn method_with(code: Vec<Instruction>) -> MethodDef {
        MethodDef {
            name: "run".to_string(),
            descriptor: "(Lhost/lang/String;)Lhost/lang/Object;".to_string(),
            is_static: true,
            is_native: false,
            max_locals: 1,
            body: MethodBody::Bytecode(code),
            handlers: vec![],
        }
    }

    fn class_with(methods: Vec<MethodDef>) -> ClassFile {
        ClassFile {
            name: "app/Thing".to_string(),
            superclass: Some("host/lang/Object".to_string()),
            interfaces: vec![],
            is_interface: false,
            manual_persistence: false,
            signature: Some("<T:Lhost/lang/Object;>".to_string()),
            fields: vec![FieldDef {
                name: "label".to_string(),
                descriptor: "Lhost/lang/String;".to_string(),
                is_static: false,
                is_synthetic: false,
            }],
            methods,
        }
    }

    #[test]
    fn test_superclass_and_descriptors_move_to_shadow_root() {
        let rewritten = rewrite_class(class_with(vec![method_with(vec![])])).unwrap();
        assert_eq!(rewritten.superclass.as_deref(), Some("ember/lang/Object"));
        assert_eq!(rewritten.fields[0].descriptor, "Lember/lang/String;");
        assert_eq!(
            rewritten.methods[0].descriptor,
            "(Lember/lang/String;)Lember/lang/Object;"
        );
        assert!(rewritten.signature.is_none());
    }

    #[test]
    fn test_host_invocation_gains_prefix_but_constructor_does_not() {
        let code = vec![
            Instruction::Invoke(
                InvokeKind::Virtual,
                MethodRef {
                    owner: "host/lang/String".to_string(),
                    name: "length".to_string(),
                    descriptor: "()I".to_string(),
                },
            ),
            Instruction::Invoke(
                InvokeKind::Special,
                MethodRef {
                    owner: "host/lang/Exception".to_string(),
                    name: "<init>".to_string(),
                    descriptor: "()V".to_string(),
                },
            ),
        ];
        let rewritten = rewrite_class(class_with(vec![method_with(code)])).unwrap();
        let code = match &rewritten.methods[0].body {
            MethodBody::Bytecode(c) => c,
            _ => unreachable!(),
        };
        match &code[0] {
            Instruction::Invoke(_, r) => {
                assert_eq!(r.owner, "ember/lang/String");
                assert_eq!(r.name, "em_length");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &code[1] {
            Instruction::Invoke(_, r) => {
                assert_eq!(r.owner, "ember/lang/Exception");
                assert_eq!(r.name, "<init>");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_string_constants_are_wrapped() {
        let code = vec![Instruction::Const(Const::Str("hello".to_string()))];
        let rewritten = rewrite_class(class_with(vec![method_with(code)])).unwrap();
        let code = match &rewritten.methods[0].body {
            MethodBody::Bytecode(c) => c,
            _ => unreachable!(),
        };
        assert_eq!(code[1], Instruction::WrapString);
    }

    #[test]
    fn test_user_invocations_are_untouched() {
        let code = vec![Instruction::Invoke(
            InvokeKind::Static,
            MethodRef {
                owner: "app/Other".to_string(),
                name: "helper".to_string(),
                descriptor: "()V".to_string(),
            },
        )];
        let rewritten = rewrite_class(class_with(vec![method_with(code)])).unwrap();
        let code = match &rewritten.methods[0].body {
            MethodBody::Bytecode(c) => c,
            _ => unreachable!(),
        };
        match &code[0] {
            Instruction::Invoke(_, r) => assert_eq!(r.name, "helper"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_method_handle_constant_is_fatal() {
        let code = vec![Instruction::Const(Const::MethodHandle("x".to_string()))];
        assert!(matches!(
            rewrite_class(class_with(vec![method_with(code)])),
            Err(TransformError::MethodHandleConstant { .. })
        ));
    }

    #[test]
    fn test_array_class_constant_is_rejected() {
        let code = vec![Instruction::Const(Const::ClassRef("[B".to_string()))];
        assert!(matches!(
            rewrite_class(class_with(vec![method_with(code)])),
            Err(TransformError::ArrayClassConstant { .. })
        ));
    }
}
