//! The loopback codec
//!
//! A single-use in-memory pipe that replays the automatic field walk of one
//! object without touching storage: a serializer drains an object into the
//! queue, a deserializer drains the queue into another object, and a
//! caller-supplied translator rewrites every reference on the way out. Used
//! by the reentrant processor for both fault (caller -> callee stub) and
//! commit (callee -> caller) directions.
//!
//! `verify_done` asserts the queue is empty; a leftover or missing entry is
//! a structural mismatch between two walks of the same layout, which is an
//! implementation bug, so it terminates the process.

use std::collections::VecDeque;

use crate::runtime::heap::{ObjectHeap, Payload};
use crate::runtime::interrupt::Interrupt;
use crate::runtime::registry::ClassRegistry;
use crate::runtime::value::{ObjHandle, ShadowValue};

/// Reference rewriting applied on the deserialize side of the pipe.
pub trait RefTranslator {
    fn translate(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        reference: Option<ObjHandle>,
    ) -> Result<Option<ObjHandle>, Interrupt>;
}

#[derive(Debug, PartialEq)]
enum LoopItem {
    Value(ShadowValue),
    /// Element count of a manual array payload
    Len(usize),
    /// Manual string/class-token payload
    Utf8(String),
}

#[derive(Debug, Default)]
pub struct LoopbackCodec {
    queue: VecDeque<LoopItem>,
}

impl LoopbackCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain `source`'s automatic fields and manual payload into the queue.
    pub fn serialize_from(
        &mut self,
        heap: &ObjectHeap,
        registry: &ClassRegistry,
        source: ObjHandle,
    ) {
        let object = heap.get(source);
        for value in &object.fields {
            self.queue.push_back(LoopItem::Value(*value));
        }
        if registry.info(object.class).manual_persistence {
            match &object.payload {
                Some(Payload::Elements(elements)) => {
                    self.queue.push_back(LoopItem::Len(elements.len()));
                    for value in elements {
                        self.queue.push_back(LoopItem::Value(*value));
                    }
                }
                Some(Payload::Utf8(text)) => {
                    self.queue.push_back(LoopItem::Utf8(text.clone()));
                }
                // A manual object that was never materialized has an empty
                // payload; transcribe it as such.
                None => self.queue.push_back(LoopItem::Len(0)),
            }
        }
    }

    /// Drain the queue into `target`, translating every reference.
    pub fn deserialize_into<T: RefTranslator>(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        target: ObjHandle,
        translator: &mut T,
    ) -> Result<(), Interrupt> {
        let (class, field_count) = {
            let object = heap.get(target);
            (object.class, object.fields.len())
        };
        for idx in 0..field_count {
            let value = self.pop_value();
            let value = self.translate_value(heap, registry, value, translator)?;
            heap.get_mut(target).fields[idx] = value;
        }
        if registry.info(class).manual_persistence {
            match self.queue.pop_front() {
                Some(LoopItem::Len(n)) => {
                    let mut elements = Vec::with_capacity(n);
                    for _ in 0..n {
                        let value = self.pop_value();
                        elements.push(self.translate_value(heap, registry, value, translator)?);
                    }
                    heap.get_mut(target).payload = Some(Payload::Elements(elements));
                }
                Some(LoopItem::Utf8(text)) => {
                    heap.get_mut(target).payload = Some(Payload::Utf8(text));
                }
                other => panic!("loopback stream desynchronized: {:?}", other),
            }
        }
        Ok(())
    }

    fn pop_value(&mut self) -> ShadowValue {
        match self.queue.pop_front() {
            Some(LoopItem::Value(v)) => v,
            other => panic!("loopback stream desynchronized: {:?}", other),
        }
    }

    fn translate_value<T: RefTranslator>(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        value: ShadowValue,
        translator: &mut T,
    ) -> Result<ShadowValue, Interrupt> {
        match value {
            ShadowValue::Ref(r) => Ok(ShadowValue::Ref(translator.translate(heap, registry, r)?)),
            other => Ok(other),
        }
    }

    /// Both sides must have walked the same layout.
    pub fn verify_done(&self) {
        assert!(
            self.queue.is_empty(),
            "loopback queue not drained: {} entries left",
            self.queue.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::heap::{LoaderState, ShadowObject};

    struct Identity;
    impl RefTranslator for Identity {
        fn translate(
            &mut self,
            _heap: &mut ObjectHeap,
            _registry: &ClassRegistry,
            reference: Option<ObjHandle>,
        ) -> Result<Option<ObjHandle>, Interrupt> {
            Ok(reference)
        }
    }

    fn throwable(heap: &mut ObjectHeap, registry: &ClassRegistry) -> ObjHandle {
        let class = registry.id_of("ember/lang/Throwable").unwrap();
        heap.alloc(ShadowObject {
            class,
            instance_id: 1,
            loader: LoaderState::Resident,
            fields: vec![ShadowValue::Ref(None), ShadowValue::Ref(None)],
            payload: None,
            identity_hash: 1,
        })
    }

    #[test]
    fn test_pipe_copies_fields() {
        let registry = ClassRegistry::builtins_only();
        let mut heap = ObjectHeap::new();
        let src = throwable(&mut heap, &registry);
        let dst = throwable(&mut heap, &registry);
        heap.get_mut(src).fields[0] = ShadowValue::Ref(Some(dst));

        let mut pipe = LoopbackCodec::new();
        pipe.serialize_from(&heap, &registry, src);
        pipe.deserialize_into(&mut heap, &registry, dst, &mut Identity)
            .unwrap();
        pipe.verify_done();

        assert_eq!(heap.get(dst).fields[0], ShadowValue::Ref(Some(dst)));
    }

    #[test]
    #[should_panic(expected = "not drained")]
    fn test_leftover_entries_are_fatal() {
        let registry = ClassRegistry::builtins_only();
        let mut heap = ObjectHeap::new();
        let src = throwable(&mut heap, &registry);
        let mut pipe = LoopbackCodec::new();
        pipe.serialize_from(&heap, &registry, src);
        pipe.verify_done();
    }
}
