//! A loaded DApp: the executable form of a transformed artifact.

use std::collections::BTreeMap;

use crate::bytecode::ClassFile;
use crate::error::{TransformError, VmError};
use crate::runtime::registry::{ClassId, ClassRegistry};
use crate::transform::TransformedModule;

/// The transformed main entry point: `main()[B` after the array pass.
const MAIN_NAME: &str = "main";
const MAIN_DESCRIPTOR: &str = "()Lember/arrays/ByteArray;";

const CLASS_INITIALIZER: &str = "<clinit>";

#[derive(Debug)]
pub struct LoadedDApp {
    pub registry: ClassRegistry,
    pub main_class: ClassId,
    entry: (ClassId, usize),
    clinits: Vec<(ClassId, usize)>,
    pub code_size: u64,
}

impl LoadedDApp {
    pub fn load(artifact: &TransformedModule) -> Result<Self, VmError> {
        let mut classes: BTreeMap<String, ClassFile> = BTreeMap::new();
        let mut code_size = 0u64;
        for (name, bytes) in &artifact.classes {
            code_size += bytes.len() as u64;
            classes.insert(name.clone(), ClassFile::parse(name, bytes)?);
        }
        let registry = ClassRegistry::build(&classes)?;

        let main_class = registry.id_of(&artifact.main_class).ok_or_else(|| {
            TransformError::MissingMainClass {
                name: artifact.main_class.clone(),
            }
        })?;
        let entry = registry
            .resolve_method(main_class, MAIN_NAME, MAIN_DESCRIPTOR)
            .ok_or_else(|| TransformError::MissingEntryPoint {
                class: artifact.main_class.clone(),
            })?;

        // Class initializers run at deployment, in load order. Only the
        // class's own declaration counts; initializers never inherit.
        let mut clinits = Vec::new();
        for &class in registry.user_load_order() {
            let info = registry.info(class);
            if let Some(idx) = info
                .methods
                .iter()
                .position(|m| m.name == CLASS_INITIALIZER && m.is_static)
            {
                clinits.push((class, idx));
            }
        }

        Ok(Self {
            registry,
            main_class,
            entry,
            clinits,
            code_size,
        })
    }

    pub fn entry_point(&self) -> (ClassId, usize) {
        self.entry
    }

    pub fn clinits(&self) -> &[(ClassId, usize)] {
        &self.clinits
    }
}
