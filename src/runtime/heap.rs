//! The object heap
//!
//! One arena of shadow objects per task. Handles are plain indices and stay
//! valid for the task's lifetime; objects are never moved or collected
//! while a transaction runs. Each object carries its persistent instance id
//! and a loader slot: `Resident` means the fields are authoritative,
//! anything else means the first field access must fault the object in.

use crate::runtime::registry::ClassId;
use crate::runtime::value::{ObjHandle, ShadowValue};

/// Instance id of the root statics container.
pub const STATICS_ROOT_ID: i64 = 0;

/// Reserved id of ephemeral callee-space stubs; never persisted.
pub const EPHEMERAL_ID: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    /// Fields are authoritative
    Resident,
    /// Fault from the object store, keyed on `instance_id`
    Disk,
    /// Fault through the reentrant processor at the given nesting level
    Reentrant(u16),
    /// Commit-phase marker: already enqueued, do not enqueue again
    Done,
}

/// Out-of-line storage for manual-persistence classes.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Array wrapper elements
    Elements(Vec<ShadowValue>),
    /// Shadow string / shadow class token contents
    Utf8(String),
}

#[derive(Debug)]
pub struct ShadowObject {
    pub class: ClassId,
    pub instance_id: i64,
    pub loader: LoaderState,
    pub fields: Vec<ShadowValue>,
    pub payload: Option<Payload>,
    pub identity_hash: i32,
}

#[derive(Debug, Default)]
pub struct ObjectHeap {
    objects: Vec<ShadowObject>,
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, object: ShadowObject) -> ObjHandle {
        let handle = ObjHandle(self.objects.len() as u32);
        self.objects.push(object);
        handle
    }

    pub fn get(&self, handle: ObjHandle) -> &ShadowObject {
        &self.objects[handle.0 as usize]
    }

    pub fn get_mut(&mut self, handle: ObjHandle) -> &mut ShadowObject {
        &mut self.objects[handle.0 as usize]
    }

    pub fn loader(&self, handle: ObjHandle) -> LoaderState {
        self.get(handle).loader
    }

    pub fn is_stub(&self, handle: ObjHandle) -> bool {
        !matches!(self.get(handle).loader, LoaderState::Resident | LoaderState::Done)
    }

    pub fn class_of(&self, handle: ObjHandle) -> ClassId {
        self.get(handle).class
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_access() {
        let mut heap = ObjectHeap::new();
        let h = heap.alloc(ShadowObject {
            class: ClassId(0),
            instance_id: 1,
            loader: LoaderState::Resident,
            fields: vec![ShadowValue::Int(7)],
            payload: None,
            identity_hash: 1,
        });
        assert_eq!(heap.get(h).fields[0], ShadowValue::Int(7));
        assert!(!heap.is_stub(h));

        heap.get_mut(h).loader = LoaderState::Disk;
        assert!(heap.is_stub(h));
    }
}
