//! Module validation
//!
//! The validator is the first pass of the pipeline: everything after it may
//! assume the module is well-formed. It rejects disallowed opcodes, reserved
//! package names, native methods, malformed descriptors, dangling labels,
//! and a missing entry point.

use std::collections::{BTreeMap, HashSet};

use crate::bytecode::instr::{Const, Instruction};
use crate::bytecode::{descriptor, ClassFile, MethodBody, MethodDef};
use crate::error::TransformError;

/// Package prefixes user classes may not claim.
const RESERVED_PREFIXES: &[&str] = &["ember/", "host/"];

/// The entry point every deployable main class must declare.
pub const ENTRY_POINT_NAME: &str = "main";
pub const ENTRY_POINT_DESCRIPTOR: &str = "()[B";

pub fn validate_module(
    main_class: &str,
    classes: &BTreeMap<String, ClassFile>,
) -> Result<(), TransformError> {
    let main = classes
        .get(main_class)
        .ok_or_else(|| TransformError::MissingMainClass {
            name: main_class.to_string(),
        })?;
    let has_entry = main.methods.iter().any(|m| {
        m.is_static && m.name == ENTRY_POINT_NAME && m.descriptor == ENTRY_POINT_DESCRIPTOR
    });
    if !has_entry {
        return Err(TransformError::MissingEntryPoint {
            class: main_class.to_string(),
        });
    }

    for (name, class) in classes {
        validate_class(name, class)?;
    }
    Ok(())
}

fn validate_class(name: &str, class: &ClassFile) -> Result<(), TransformError> {
    if RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return Err(TransformError::ReservedPackage {
            class: name.to_string(),
        });
    }

    for field in &class.fields {
        check_descriptor(&field.descriptor)?;
    }

    for method in &class.methods {
        if method.is_native {
            return Err(TransformError::NativeMethod {
                class: name.to_string(),
                method: method.name.clone(),
            });
        }
        check_descriptor(&method.descriptor)?;
        validate_method(name, method)?;
    }
    Ok(())
}

fn validate_method(class: &str, method: &MethodDef) -> Result<(), TransformError> {
    let code = match &method.body {
        MethodBody::Bytecode(code) => code,
        // User input never carries intrinsics; an intrinsic body means the
        // class was synthesized by us and is exempt.
        MethodBody::Intrinsic(_) => {
            return Err(TransformError::DisallowedOpcode {
                class: class.to_string(),
                method: method.name.clone(),
                opcode: "intrinsic".to_string(),
            })
        }
    };

    let defined: HashSet<u32> = code
        .iter()
        .filter_map(|i| match i {
            Instruction::Label(l) => Some(*l),
            _ => None,
        })
        .collect();

    for instr in code {
        if instr.is_float_arithmetic() || instr.is_injected() {
            return Err(TransformError::DisallowedOpcode {
                class: class.to_string(),
                method: method.name.clone(),
                opcode: instr.mnemonic().to_string(),
            });
        }
        match instr {
            Instruction::InvokeDynamic(_) => {
                return Err(TransformError::DisallowedOpcode {
                    class: class.to_string(),
                    method: method.name.clone(),
                    opcode: instr.mnemonic().to_string(),
                })
            }
            Instruction::Const(Const::MethodHandle(_)) => {
                return Err(TransformError::MethodHandleConstant {
                    class: class.to_string(),
                    method: method.name.clone(),
                })
            }
            Instruction::Jump(target) | Instruction::Branch(_, target) => {
                if !defined.contains(target) {
                    return Err(TransformError::UndefinedLabel {
                        class: class.to_string(),
                        method: method.name.clone(),
                        label: *target,
                    });
                }
            }
            Instruction::GetField(r)
            | Instruction::PutField(r)
            | Instruction::GetStatic(r)
            | Instruction::PutStatic(r) => check_descriptor(&r.descriptor)?,
            Instruction::Invoke(_, r) => check_descriptor(&r.descriptor)?,
            Instruction::NewArray(elem) => check_descriptor(elem)?,
            _ => {}
        }
    }

    for handler in &method.handlers {
        for label in [handler.start, handler.end, handler.target] {
            if !defined.contains(&label) {
                return Err(TransformError::UndefinedLabel {
                    class: class.to_string(),
                    method: method.name.clone(),
                    label,
                });
            }
        }
    }
    Ok(())
}

fn check_descriptor(descriptor: &str) -> Result<(), TransformError> {
    // An identity rewrite exercises the full grammar.
    descriptor::rewrite(descriptor, &|name: &str| name.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_main(extra_methods: Vec<MethodDef>) -> BTreeMap<String, ClassFile> {
        let mut methods = vec![MethodDef {
            name: "main".to_string(),
            descriptor: "()[B".to_string(),
            is_static: true,
            is_native: false,
            max_locals: 0,
            body: MethodBody::Bytecode(vec![Instruction::Const(Const::Null), Instruction::ReturnValue]),
            handlers: vec![],
        }];
        methods.extend(extra_methods);
        let class = ClassFile {
            name: "app/Main".to_string(),
            superclass: Some("host/lang/Object".to_string()),
            interfaces: vec![],
            is_interface: false,
            manual_persistence: false,
            signature: None,
            fields: vec![],
            methods,
        };
        let mut m = BTreeMap::new();
        m.insert(class.name.clone(), class);
        m
    }

    #[test]
    fn test_accepts_minimal_module() {
        let m = minimal_main(vec![]);
        assert!(validate_module("app/Main", &m).is_ok());
    }

    #[test]
    fn test_rejects_missing_entry_point() {
        let mut m = minimal_main(vec![]);
        m.get_mut("app/Main").unwrap().methods.clear();
        assert!(matches!(
            validate_module("app/Main", &m),
            Err(TransformError::MissingEntryPoint { .. })
        ));
    }

    #[test]
    fn test_rejects_native_method() {
        let m = minimal_main(vec![MethodDef {
            name: "nativeThing".to_string(),
            descriptor: "()V".to_string(),
            is_static: false,
            is_native: true,
            max_locals: 0,
            body: MethodBody::Bytecode(vec![]),
            handlers: vec![],
        }]);
        assert!(matches!(
            validate_module("app/Main", &m),
            Err(TransformError::NativeMethod { .. })
        ));
    }

    #[test]
    fn test_rejects_float_arithmetic() {
        let m = minimal_main(vec![MethodDef {
            name: "bad".to_string(),
            descriptor: "()V".to_string(),
            is_static: true,
            is_native: false,
            max_locals: 0,
            body: MethodBody::Bytecode(vec![Instruction::FAdd, Instruction::Return]),
            handlers: vec![],
        }]);
        assert!(matches!(
            validate_module("app/Main", &m),
            Err(TransformError::DisallowedOpcode { .. })
        ));
    }

    #[test]
    fn test_rejects_pre_injected_charges() {
        let m = minimal_main(vec![MethodDef {
            name: "bad".to_string(),
            descriptor: "()V".to_string(),
            is_static: true,
            is_native: false,
            max_locals: 0,
            body: MethodBody::Bytecode(vec![Instruction::ChargeEnergy(1), Instruction::Return]),
            handlers: vec![],
        }]);
        assert!(matches!(
            validate_module("app/Main", &m),
            Err(TransformError::DisallowedOpcode { .. })
        ));
    }

    #[test]
    fn test_rejects_reserved_package() {
        let mut m = minimal_main(vec![]);
        let mut stolen = m.get("app/Main").unwrap().clone();
        stolen.name = "ember/lang/Sneaky".to_string();
        m.insert(stolen.name.clone(), stolen);
        assert!(matches!(
            validate_module("app/Main", &m),
            Err(TransformError::ReservedPackage { .. })
        ));
    }

    #[test]
    fn test_rejects_undefined_label() {
        let m = minimal_main(vec![MethodDef {
            name: "bad".to_string(),
            descriptor: "()V".to_string(),
            is_static: true,
            is_native: false,
            max_locals: 0,
            body: MethodBody::Bytecode(vec![Instruction::Jump(7), Instruction::Return]),
            handlers: vec![],
        }]);
        assert!(matches!(
            validate_module("app/Main", &m),
            Err(TransformError::UndefinedLabel { label: 7, .. })
        ));
    }
}
