//! Class hierarchy forest and object-size computation
//!
//! The forest records the parent/interface relationships of every user class
//! so metering can price allocations and the validator can reason about
//! inheritance. User classes may root themselves in runtime types (the host
//! root before renaming, the shadow root after); those contribute a fixed
//! header to object sizes but are not nodes of the forest.

use std::collections::{BTreeMap, HashMap};

use crate::bytecode::ClassFile;
use crate::error::TransformError;

/// Bytes charged for the bookkeeping prefix of every object.
pub const OBJECT_HEADER_BYTES: u64 = 16;

/// Size attributed to a runtime parent outside the forest.
const RUNTIME_PARENT_BYTES: u64 = OBJECT_HEADER_BYTES;

#[derive(Debug)]
pub struct HierarchyForest {
    parents: HashMap<String, String>,
    /// Deterministic load order: the module's lexicographic class order
    load_order: Vec<String>,
}

/// True for types provided by the runtime rather than the module.
pub fn is_runtime_type(name: &str) -> bool {
    name.starts_with("host/lang/") || name.starts_with("ember/")
}

impl HierarchyForest {
    /// Build the forest, rejecting unknown parents and inheritance cycles.
    pub fn build(classes: &BTreeMap<String, ClassFile>) -> Result<Self, TransformError> {
        let mut parents = HashMap::new();
        let mut load_order = Vec::new();

        for (name, class) in classes {
            let parent = match &class.superclass {
                Some(p) => p.clone(),
                None => {
                    return Err(TransformError::UnknownParent {
                        class: name.clone(),
                        parent: "<none>".to_string(),
                    })
                }
            };
            if !classes.contains_key(&parent) && !is_runtime_type(&parent) {
                return Err(TransformError::UnknownParent {
                    class: name.clone(),
                    parent,
                });
            }
            for itf in &class.interfaces {
                if !classes.contains_key(itf) && !is_runtime_type(itf) {
                    return Err(TransformError::UnknownParent {
                        class: name.clone(),
                        parent: itf.clone(),
                    });
                }
            }
            parents.insert(name.clone(), parent);
            load_order.push(name.clone());
        }

        let forest = Self {
            parents,
            load_order,
        };
        forest.check_acyclic()?;
        Ok(forest)
    }

    fn check_acyclic(&self) -> Result<(), TransformError> {
        for start in self.parents.keys() {
            let mut seen = vec![start.as_str()];
            let mut cursor = start.as_str();
            while let Some(parent) = self.parents.get(cursor) {
                if is_runtime_type(parent) {
                    break;
                }
                if seen.contains(&parent.as_str()) {
                    return Err(TransformError::HierarchyCycle {
                        class: start.clone(),
                    });
                }
                seen.push(parent);
                cursor = parent;
            }
        }
        Ok(())
    }

    /// The user-class chain from `name` upward, self first, runtime root excluded.
    pub fn parent_chain<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        let mut chain = vec![name];
        let mut cursor = name;
        while let Some(parent) = self.parents.get(cursor) {
            if is_runtime_type(parent) {
                break;
            }
            chain.push(parent.as_str());
            cursor = parent;
        }
        chain
    }

    /// Compute the allocation size of every class: declared instance fields
    /// plus the cached size of the parent. Arrays are priced at construction
    /// time instead (header + length x element size).
    pub fn object_sizes(
        &self,
        classes: &BTreeMap<String, ClassFile>,
    ) -> HashMap<String, u64> {
        let mut sizes: HashMap<String, u64> = HashMap::new();
        for name in &self.load_order {
            self.size_of(name, classes, &mut sizes);
        }
        sizes
    }

    fn size_of(
        &self,
        name: &str,
        classes: &BTreeMap<String, ClassFile>,
        sizes: &mut HashMap<String, u64>,
    ) -> u64 {
        if let Some(cached) = sizes.get(name) {
            return *cached;
        }
        let parent = self.parents.get(name);
        let parent_size = match parent {
            Some(p) if !is_runtime_type(p) => self.size_of(p, classes, sizes),
            _ => RUNTIME_PARENT_BYTES,
        };
        let own: u64 = classes
            .get(name)
            .map(|c| {
                c.fields
                    .iter()
                    .filter(|f| !f.is_static && !f.is_synthetic)
                    .map(|f| field_size(&f.descriptor))
                    .sum()
            })
            .unwrap_or(0);
        let total = parent_size + own;
        sizes.insert(name.to_string(), total);
        total
    }
}

/// Serialized width of a field descriptor, arrays included.
fn field_size(descriptor: &str) -> u64 {
    match descriptor.as_bytes().first() {
        Some(b'Z') | Some(b'B') => 1,
        Some(b'S') | Some(b'C') => 2,
        Some(b'I') | Some(b'F') => 4,
        Some(b'J') | Some(b'D') => 8,
        _ => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ClassFile, FieldDef};

    fn class(name: &str, superclass: &str, fields: Vec<(&str, &str)>) -> ClassFile {
        ClassFile {
            name: name.to_string(),
            superclass: Some(superclass.to_string()),
            interfaces: vec![],
            is_interface: false,
            manual_persistence: false,
            signature: None,
            fields: fields
                .into_iter()
                .map(|(n, d)| FieldDef {
                    name: n.to_string(),
                    descriptor: d.to_string(),
                    is_static: false,
                    is_synthetic: false,
                })
                .collect(),
            methods: vec![],
        }
    }

    fn module(classes: Vec<ClassFile>) -> BTreeMap<String, ClassFile> {
        classes.into_iter().map(|c| (c.name.clone(), c)).collect()
    }

    #[test]
    fn test_parent_chain() {
        let m = module(vec![
            class("a/Base", "host/lang/Object", vec![("x", "I")]),
            class("a/Mid", "a/Base", vec![("y", "J")]),
            class("a/Leaf", "a/Mid", vec![]),
        ]);
        let forest = HierarchyForest::build(&m).unwrap();
        assert_eq!(forest.parent_chain("a/Leaf"), vec!["a/Leaf", "a/Mid", "a/Base"]);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let m = module(vec![class("a/Orphan", "a/Missing", vec![])]);
        assert!(matches!(
            HierarchyForest::build(&m),
            Err(TransformError::UnknownParent { .. })
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let m = module(vec![
            class("a/A", "a/B", vec![]),
            class("a/B", "a/A", vec![]),
        ]);
        assert!(matches!(
            HierarchyForest::build(&m),
            Err(TransformError::HierarchyCycle { .. })
        ));
    }

    #[test]
    fn test_object_sizes_accumulate_parent() {
        let m = module(vec![
            class("a/Base", "host/lang/Object", vec![("x", "I")]),
            class("a/Leaf", "a/Base", vec![("r", "La/Base;"), ("b", "B")]),
        ]);
        let forest = HierarchyForest::build(&m).unwrap();
        let sizes = forest.object_sizes(&m);
        assert_eq!(sizes["a/Base"], OBJECT_HEADER_BYTES + 4);
        assert_eq!(sizes["a/Leaf"], OBJECT_HEADER_BYTES + 4 + 8 + 1);
    }
}
