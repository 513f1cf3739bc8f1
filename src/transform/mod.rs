//! The bytecode transformation pipeline
//!
//! Raw class bytes flow through an explicit ordered chain of
//! `ClassFile -> ClassFile` passes:
//!
//! validate -> hierarchy forest -> size computation ->
//! renaming -> exception wrapping -> metering -> stack tracking -> arrays
//!
//! The output artifact contains only transformed classes plus the wrappers
//! the module turned out to need. No source-form class survives.

pub mod arrays;
pub mod exceptions;
pub mod hierarchy;
pub mod metering;
pub mod renaming;
pub mod stack_tracking;
pub mod validator;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::bytecode::ClassFile;
use crate::config::VmConfig;
use crate::error::TransformError;

/// An untrusted module as submitted for deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawModule {
    pub main_class: String,
    /// Fully qualified class name -> class bytes
    pub classes: BTreeMap<String, Vec<u8>>,
}

impl RawModule {
    pub fn from_classes(main_class: &str, classes: Vec<ClassFile>) -> Self {
        Self {
            main_class: main_class.to_string(),
            classes: classes
                .into_iter()
                .map(|c| (c.name.clone(), c.to_bytes()))
                .collect(),
        }
    }
}

/// The persisted artifact: output of the full transformation chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedModule {
    pub main_class: String,
    pub classes: BTreeMap<String, Vec<u8>>,
}

/// Run the full chain over a raw module.
pub fn transform_module(
    raw: &RawModule,
    config: &VmConfig,
) -> Result<TransformedModule, TransformError> {
    let mut classes: BTreeMap<String, ClassFile> = BTreeMap::new();
    for (name, bytes) in &raw.classes {
        let class = ClassFile::parse(name, bytes)?;
        if class.name != *name {
            return Err(TransformError::MalformedClass {
                name: name.clone(),
                details: format!("class names itself '{}'", class.name),
            });
        }
        classes.insert(name.clone(), class);
    }

    validator::validate_module(&raw.main_class, &classes)?;

    let forest = hierarchy::HierarchyForest::build(&classes)?;
    let sizes = forest.object_sizes(&classes);

    let mut needed_wrappers = BTreeSet::new();
    let mut out: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for (name, class) in classes {
        let class = renaming::rewrite_class(class)?;
        let class = exceptions::wrap_exceptions(class);
        let class = metering::meter_class(class, &sizes, &config.schedule);
        let class = stack_tracking::track_stack(class);
        let class = arrays::rewrite_arrays(class, &mut needed_wrappers)?;
        out.insert(name, class.to_bytes());
    }

    for wrapper in needed_wrappers {
        let class = arrays::generate_wrapper(&wrapper);
        out.insert(wrapper, class.to_bytes());
    }

    Ok(TransformedModule {
        main_class: raw.main_class.clone(),
        classes: out,
    })
}
