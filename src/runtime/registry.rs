//! The class registry
//!
//! Runtime metadata for every class a DApp can touch: built-in shadow
//! classes, array wrappers, and the transformed user classes. The registry
//! is the single source of truth for field layouts: both the interpreter
//! and the persistence codecs walk the same resolved layout, which is what
//! keeps "reflection" deterministic.

use std::collections::{BTreeMap, HashMap};

use crate::bytecode::descriptor::{self, FieldType};
use crate::bytecode::instr::ExceptionHandler;
use crate::bytecode::{ClassFile, Instruction, Intrinsic, Label, MethodBody};
use crate::error::TransformError;
use crate::runtime::builtins;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Element kind of an array wrapper class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemKind {
    Bool,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Ref,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: FieldType,
}

/// One slot of an object's full resolved layout, root class first.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub declaring: ClassId,
    pub layout: FieldLayout,
}

/// Executable form of a method body with labels resolved.
#[derive(Debug)]
pub struct CompiledCode {
    pub code: Vec<Instruction>,
    pub labels: HashMap<Label, usize>,
    pub handlers: Vec<ExceptionHandler>,
    pub max_locals: u16,
}

#[derive(Debug)]
pub enum RuntimeBody {
    Code(CompiledCode),
    Intrinsic(Intrinsic),
}

#[derive(Debug)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    pub body: RuntimeBody,
}

#[derive(Debug)]
pub struct ClassInfo {
    pub name: String,
    pub superclass: Option<ClassId>,
    pub is_interface: bool,
    pub manual_persistence: bool,
    pub elem_kind: Option<ElemKind>,
    pub declared_fields: Vec<FieldLayout>,
    pub static_fields: Vec<FieldLayout>,
    pub methods: Vec<MethodInfo>,
    /// Full instance layout, chain root first; filled by `finalize`
    pub layout: Vec<ResolvedField>,
}

/// One slot of the statics vector.
#[derive(Debug, Clone)]
pub struct StaticSlot {
    pub class: ClassId,
    pub class_name: String,
    pub field: FieldLayout,
}

#[derive(Debug, Default)]
pub struct StaticsLayout {
    pub slots: Vec<StaticSlot>,
    index: HashMap<(String, String), usize>,
}

impl StaticsLayout {
    pub fn slot_of(&self, class: &str, field: &str) -> Option<usize> {
        self.index
            .get(&(class.to_string(), field.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Debug)]
pub struct ClassRegistry {
    infos: Vec<ClassInfo>,
    by_name: HashMap<String, ClassId>,
    statics: StaticsLayout,
    /// User classes in load order, for `<clinit>` sequencing
    user_load_order: Vec<ClassId>,
}

impl ClassRegistry {
    /// Build a registry over a transformed module's classes. Built-in shadow
    /// classes are installed first; module classes that duplicate a built-in
    /// (the synthesized array wrappers) defer to the built-in.
    pub fn build(classes: &BTreeMap<String, ClassFile>) -> Result<Self, TransformError> {
        let mut registry = Self {
            infos: Vec::new(),
            by_name: HashMap::new(),
            statics: StaticsLayout::default(),
            user_load_order: Vec::new(),
        };
        builtins::install(&mut registry);

        // First pass: register names so parents resolve in any order.
        let mut pending: Vec<(ClassId, &ClassFile)> = Vec::new();
        for class in classes.values() {
            if registry.by_name.contains_key(&class.name) {
                continue;
            }
            let id = registry.push_empty(&class.name);
            pending.push((id, class));
        }

        // Second pass: fill in bodies and layouts.
        for (id, class) in &pending {
            let info = registry.compile_class(class)?;
            registry.infos[id.0 as usize] = info;
        }
        for (id, class) in &pending {
            if !class.name.starts_with("ember/") {
                registry.user_load_order.push(*id);
            }
        }
        registry.finalize_layouts();
        registry.build_statics_layout();
        Ok(registry)
    }

    /// Registry with only the built-in classes; used by unit tests.
    pub fn builtins_only() -> Self {
        let mut registry = Self {
            infos: Vec::new(),
            by_name: HashMap::new(),
            statics: StaticsLayout::default(),
            user_load_order: Vec::new(),
        };
        builtins::install(&mut registry);
        registry.finalize_layouts();
        registry
    }

    fn push_empty(&mut self, name: &str) -> ClassId {
        let id = ClassId(self.infos.len() as u32);
        self.by_name.insert(name.to_string(), id);
        self.infos.push(ClassInfo {
            name: name.to_string(),
            superclass: None,
            is_interface: false,
            manual_persistence: false,
            elem_kind: None,
            declared_fields: Vec::new(),
            static_fields: Vec::new(),
            methods: Vec::new(),
            layout: Vec::new(),
        });
        id
    }

    /// Used by the built-in installer, which constructs infos directly.
    pub(crate) fn install_info(&mut self, info: ClassInfo) -> ClassId {
        let id = ClassId(self.infos.len() as u32);
        self.by_name.insert(info.name.clone(), id);
        self.infos.push(info);
        id
    }

    fn compile_class(&self, class: &ClassFile) -> Result<ClassInfo, TransformError> {
        let superclass = match &class.superclass {
            Some(name) => Some(self.by_name.get(name).copied().ok_or_else(|| {
                TransformError::UnknownParent {
                    class: class.name.clone(),
                    parent: name.clone(),
                }
            })?),
            None => None,
        };

        let mut declared_fields = Vec::new();
        let mut static_fields = Vec::new();
        for field in &class.fields {
            if field.is_synthetic {
                continue;
            }
            let layout = FieldLayout {
                name: field.name.clone(),
                ty: descriptor::parse_field_type(&field.descriptor)?,
            };
            if field.is_static {
                static_fields.push(layout);
            } else {
                declared_fields.push(layout);
            }
        }

        let mut methods = Vec::new();
        for method in &class.methods {
            let body = match &method.body {
                MethodBody::Intrinsic(i) => RuntimeBody::Intrinsic(*i),
                MethodBody::Bytecode(code) => {
                    let mut labels = HashMap::new();
                    for (idx, instr) in code.iter().enumerate() {
                        if let Instruction::Label(l) = instr {
                            labels.insert(*l, idx);
                        }
                    }
                    RuntimeBody::Code(CompiledCode {
                        code: code.clone(),
                        labels,
                        handlers: method.handlers.clone(),
                        max_locals: method.max_locals,
                    })
                }
            };
            methods.push(MethodInfo {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                is_static: method.is_static,
                body,
            });
        }

        Ok(ClassInfo {
            name: class.name.clone(),
            superclass,
            is_interface: class.is_interface,
            manual_persistence: class.manual_persistence,
            elem_kind: builtins::elem_kind_for(&class.name),
            declared_fields,
            static_fields,
            methods,
            layout: Vec::new(),
        })
    }

    /// Resolve every class's full instance layout, chain root first and
    /// stopping below the first manual-persistence class.
    fn finalize_layouts(&mut self) {
        for idx in 0..self.infos.len() {
            let id = ClassId(idx as u32);
            let mut chain = Vec::new();
            let mut cursor = Some(id);
            while let Some(c) = cursor {
                chain.push(c);
                cursor = self.infos[c.0 as usize].superclass;
            }
            chain.reverse();
            let mut layout = Vec::new();
            for c in chain {
                let info = &self.infos[c.0 as usize];
                for field in &info.declared_fields {
                    layout.push(ResolvedField {
                        declaring: c,
                        layout: field.clone(),
                    });
                }
            }
            self.infos[idx].layout = layout;
        }
    }

    /// The statics vector: class load order, then declared field order.
    fn build_statics_layout(&mut self) {
        let mut slots = Vec::new();
        let mut index = HashMap::new();
        for &id in &self.user_load_order {
            let info = &self.infos[id.0 as usize];
            for field in &info.static_fields {
                index.insert((info.name.clone(), field.name.clone()), slots.len());
                slots.push(StaticSlot {
                    class: id,
                    class_name: info.name.clone(),
                    field: field.clone(),
                });
            }
        }
        self.statics = StaticsLayout { slots, index };
    }

    pub fn id_of(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn info(&self, id: ClassId) -> &ClassInfo {
        &self.infos[id.0 as usize]
    }

    pub fn statics_layout(&self) -> &StaticsLayout {
        &self.statics
    }

    pub fn user_load_order(&self) -> &[ClassId] {
        &self.user_load_order
    }

    /// Subtype check along the superclass chain (interfaces included).
    pub fn is_subtype(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut cursor = Some(sub);
        while let Some(c) = cursor {
            if c == sup {
                return true;
            }
            cursor = self.info(c).superclass;
        }
        false
    }

    /// Virtual resolution: walk the chain from `class` upward for a method
    /// matching name and descriptor.
    pub fn resolve_method(
        &self,
        class: ClassId,
        name: &str,
        descriptor: &str,
    ) -> Option<(ClassId, usize)> {
        let mut cursor = Some(class);
        while let Some(c) = cursor {
            let info = self.info(c);
            if let Some(idx) = info
                .methods
                .iter()
                .position(|m| m.name == name && m.descriptor == descriptor)
            {
                return Some((c, idx));
            }
            cursor = info.superclass;
        }
        None
    }

    /// Loose resolution by name only; used by intrinsic-owner dispatch where
    /// descriptors are canonical.
    pub fn resolve_method_named(&self, class: ClassId, name: &str) -> Option<(ClassId, usize)> {
        let mut cursor = Some(class);
        while let Some(c) = cursor {
            let info = self.info(c);
            if let Some(idx) = info.methods.iter().position(|m| m.name == name) {
                return Some((c, idx));
            }
            cursor = self.info(c).superclass;
        }
        None
    }

    /// Index of a named field in the object's resolved layout. Subclass
    /// declarations shadow the parent's, hence the reverse search.
    pub fn field_slot(&self, class: ClassId, name: &str) -> Option<usize> {
        self.info(class)
            .layout
            .iter()
            .rposition(|f| f.layout.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ClassFile, FieldDef};

    fn user_class(name: &str, superclass: &str, fields: Vec<(&str, &str, bool)>) -> ClassFile {
        ClassFile {
            name: name.to_string(),
            superclass: Some(superclass.to_string()),
            interfaces: vec![],
            is_interface: false,
            manual_persistence: false,
            signature: None,
            fields: fields
                .into_iter()
                .map(|(n, d, is_static)| FieldDef {
                    name: n.to_string(),
                    descriptor: d.to_string(),
                    is_static,
                    is_synthetic: false,
                })
                .collect(),
            methods: vec![],
        }
    }

    fn build(classes: Vec<ClassFile>) -> ClassRegistry {
        let map: BTreeMap<String, ClassFile> =
            classes.into_iter().map(|c| (c.name.clone(), c)).collect();
        ClassRegistry::build(&map).unwrap()
    }

    #[test]
    fn test_layout_follows_chain_root_first() {
        let registry = build(vec![
            user_class("app/Base", "ember/lang/Object", vec![("x", "I", false)]),
            user_class("app/Leaf", "app/Base", vec![("y", "J", false)]),
        ]);
        let leaf = registry.id_of("app/Leaf").unwrap();
        let layout = &registry.info(leaf).layout;
        assert_eq!(layout.len(), 2);
        assert_eq!(layout[0].layout.name, "x");
        assert_eq!(layout[1].layout.name, "y");
    }

    #[test]
    fn test_statics_vector_order() {
        let registry = build(vec![
            user_class(
                "app/A",
                "ember/lang/Object",
                vec![("s1", "I", true), ("s2", "J", true)],
            ),
            user_class("app/B", "ember/lang/Object", vec![("s3", "I", true)]),
        ]);
        let layout = registry.statics_layout();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout.slot_of("app/A", "s2"), Some(1));
        assert_eq!(layout.slot_of("app/B", "s3"), Some(2));
    }

    #[test]
    fn test_subtype_through_builtin_chain() {
        let registry = ClassRegistry::builtins_only();
        let arith = registry.id_of("ember/lang/ArithmeticException").unwrap();
        let throwable = registry.id_of("ember/lang/Throwable").unwrap();
        let object = registry.id_of("ember/lang/Object").unwrap();
        assert!(registry.is_subtype(arith, throwable));
        assert!(registry.is_subtype(arith, object));
        assert!(!registry.is_subtype(throwable, arith));
    }
}
