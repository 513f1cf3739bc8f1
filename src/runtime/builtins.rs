//! Built-in shadow classes
//!
//! The runtime provides the shadow root, the string and class-token types,
//! the throwable hierarchy, the canonical array wrappers, and the bridge
//! marker classes. User modules reference these by name; the registry
//! installs them ahead of any module class so the ids are stable within a
//! registry.

use once_cell::sync::Lazy;

use crate::bytecode::descriptor::FieldType;
use crate::bytecode::Intrinsic;
use crate::runtime::registry::{ClassInfo, ClassRegistry, ElemKind, FieldLayout, MethodInfo, RuntimeBody};

pub const SHADOW_OBJECT: &str = "ember/lang/Object";
pub const SHADOW_STRING: &str = "ember/lang/String";
pub const SHADOW_CLASS: &str = "ember/lang/Class";
pub const SHADOW_THROWABLE: &str = "ember/lang/Throwable";
pub const SHADOW_EXCEPTION: &str = "ember/lang/Exception";
pub const SHADOW_RUNTIME_EXCEPTION: &str = "ember/lang/RuntimeException";
pub const SHADOW_ARITHMETIC_EXCEPTION: &str = "ember/lang/ArithmeticException";
pub const SHADOW_NULL_POINTER_EXCEPTION: &str = "ember/lang/NullPointerException";
pub const SHADOW_BOUNDS_EXCEPTION: &str = "ember/lang/IndexOutOfBoundsException";
pub const SHADOW_ERROR: &str = "ember/lang/Error";
pub const SHADOW_ASSERTION_ERROR: &str = "ember/lang/AssertionError";

/// The runtime bridge: static calls on this owner are intercepted.
pub const BRIDGE_CLASS: &str = "ember/rt/Chain";
/// Result object returned by the nested call/create primitives.
pub const BRIDGE_RESULT: &str = "ember/rt/Result";

pub const BYTE_ARRAY: &str = "ember/arrays/ByteArray";
pub const OBJECT_ARRAY: &str = "ember/arrays/ObjectArray";

struct BuiltinSpec {
    name: &'static str,
    superclass: Option<&'static str>,
    manual: bool,
    fields: &'static [(&'static str, &'static str)],
    methods: &'static [(&'static str, &'static str, bool, Intrinsic)],
}

const THROWABLE_CTORS: &[(&str, &str, bool, Intrinsic)] = &[
    ("<init>", "()V", false, Intrinsic::ThrowableInit),
    (
        "<init>",
        "(Lember/lang/String;)V",
        false,
        Intrinsic::ThrowableInitMessage,
    ),
    (
        "<init>",
        "(Lember/lang/String;Lember/lang/Throwable;)V",
        false,
        Intrinsic::ThrowableInitMessageCause,
    ),
    (
        "em_getMessage",
        "()Lember/lang/String;",
        false,
        Intrinsic::ThrowableGetMessage,
    ),
];

const ARRAY_METHODS: &[(&str, &str, bool, Intrinsic)] = &[
    ("init", "(I)Lember/lang/Object;", true, Intrinsic::ArrayInit),
    ("em_length", "()I", false, Intrinsic::ArrayLength),
    ("em_get", "(I)Lember/lang/Object;", false, Intrinsic::ArrayGet),
    (
        "em_set",
        "(ILember/lang/Object;)V",
        false,
        Intrinsic::ArraySet,
    ),
    ("em_hashCode", "()I", false, Intrinsic::ArrayHashCode),
];

static BUILTINS: Lazy<Vec<BuiltinSpec>> = Lazy::new(|| {
    let throwable_like = |name: &'static str, superclass: &'static str| BuiltinSpec {
        name,
        superclass: Some(superclass),
        manual: false,
        fields: &[],
        methods: THROWABLE_CTORS,
    };
    let array = |name: &'static str| BuiltinSpec {
        name,
        superclass: Some(SHADOW_OBJECT),
        manual: true,
        fields: &[],
        methods: ARRAY_METHODS,
    };
    vec![
        BuiltinSpec {
            name: SHADOW_OBJECT,
            superclass: None,
            manual: false,
            fields: &[],
            methods: &[
                ("<init>", "()V", false, Intrinsic::ObjectInit),
                ("em_hashCode", "()I", false, Intrinsic::ObjectHashCode),
            ],
        },
        BuiltinSpec {
            name: SHADOW_STRING,
            superclass: Some(SHADOW_OBJECT),
            manual: true,
            fields: &[],
            methods: &[("em_length", "()I", false, Intrinsic::StringLength)],
        },
        BuiltinSpec {
            name: SHADOW_CLASS,
            superclass: Some(SHADOW_OBJECT),
            manual: true,
            fields: &[],
            methods: &[],
        },
        BuiltinSpec {
            name: SHADOW_THROWABLE,
            superclass: Some(SHADOW_OBJECT),
            manual: false,
            fields: &[
                ("message", "Lember/lang/String;"),
                ("cause", "Lember/lang/Throwable;"),
            ],
            methods: THROWABLE_CTORS,
        },
        throwable_like(SHADOW_EXCEPTION, SHADOW_THROWABLE),
        throwable_like(SHADOW_RUNTIME_EXCEPTION, SHADOW_EXCEPTION),
        throwable_like(SHADOW_ARITHMETIC_EXCEPTION, SHADOW_RUNTIME_EXCEPTION),
        throwable_like(SHADOW_NULL_POINTER_EXCEPTION, SHADOW_RUNTIME_EXCEPTION),
        throwable_like(SHADOW_BOUNDS_EXCEPTION, SHADOW_RUNTIME_EXCEPTION),
        throwable_like(SHADOW_ERROR, SHADOW_THROWABLE),
        throwable_like(SHADOW_ASSERTION_ERROR, SHADOW_ERROR),
        BuiltinSpec {
            name: BRIDGE_CLASS,
            superclass: Some(SHADOW_OBJECT),
            manual: false,
            fields: &[],
            methods: &[],
        },
        BuiltinSpec {
            name: BRIDGE_RESULT,
            superclass: Some(SHADOW_OBJECT),
            manual: false,
            fields: &[("success", "Z"), ("data", "Lember/arrays/ByteArray;")],
            methods: &[],
        },
        array("ember/arrays/BoolArray"),
        array(BYTE_ARRAY),
        array("ember/arrays/ShortArray"),
        array("ember/arrays/CharArray"),
        array("ember/arrays/IntArray"),
        array("ember/arrays/LongArray"),
        array("ember/arrays/FloatArray"),
        array("ember/arrays/DoubleArray"),
        array(OBJECT_ARRAY),
    ]
});

/// Element kind of the named array wrapper, if it is one.
pub fn elem_kind_for(name: &str) -> Option<ElemKind> {
    match name {
        "ember/arrays/BoolArray" => Some(ElemKind::Bool),
        "ember/arrays/ByteArray" => Some(ElemKind::Byte),
        "ember/arrays/ShortArray" => Some(ElemKind::Short),
        "ember/arrays/CharArray" => Some(ElemKind::Char),
        "ember/arrays/IntArray" => Some(ElemKind::Int),
        "ember/arrays/LongArray" => Some(ElemKind::Long),
        "ember/arrays/FloatArray" => Some(ElemKind::Float),
        "ember/arrays/DoubleArray" => Some(ElemKind::Double),
        "ember/arrays/ObjectArray" => Some(ElemKind::Ref),
        _ => None,
    }
}

/// Install every built-in class. Parents precede children in the table, so
/// ids resolve in one pass.
pub fn install(registry: &mut ClassRegistry) {
    for spec in BUILTINS.iter() {
        let superclass = spec.superclass.map(|name| {
            registry
                .id_of(name)
                .expect("builtin table is parent-ordered")
        });
        let declared_fields = spec
            .fields
            .iter()
            .map(|(name, descriptor)| FieldLayout {
                name: (*name).to_string(),
                ty: parse_builtin_type(descriptor),
            })
            .collect();
        let methods = spec
            .methods
            .iter()
            .map(|(name, descriptor, is_static, intrinsic)| MethodInfo {
                name: (*name).to_string(),
                descriptor: (*descriptor).to_string(),
                is_static: *is_static,
                body: RuntimeBody::Intrinsic(*intrinsic),
            })
            .collect();
        registry.install_info(ClassInfo {
            name: spec.name.to_string(),
            superclass,
            is_interface: false,
            manual_persistence: spec.manual,
            elem_kind: elem_kind_for(spec.name),
            declared_fields,
            static_fields: Vec::new(),
            methods,
            layout: Vec::new(),
        });
    }
}

fn parse_builtin_type(descriptor: &str) -> FieldType {
    crate::bytecode::descriptor::parse_field_type(descriptor)
        .expect("builtin field descriptors are well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::registry::ClassRegistry;

    #[test]
    fn test_builtins_install_cleanly() {
        let registry = ClassRegistry::builtins_only();
        assert!(registry.id_of(SHADOW_OBJECT).is_some());
        assert!(registry.id_of(SHADOW_ASSERTION_ERROR).is_some());
        assert!(registry.id_of(BYTE_ARRAY).is_some());
    }

    #[test]
    fn test_throwable_layout_has_message_and_cause() {
        let registry = ClassRegistry::builtins_only();
        let npe = registry.id_of(SHADOW_NULL_POINTER_EXCEPTION).unwrap();
        let layout = &registry.info(npe).layout;
        assert_eq!(layout.len(), 2);
        assert_eq!(layout[0].layout.name, "message");
        assert_eq!(layout[1].layout.name, "cause");
    }
}
