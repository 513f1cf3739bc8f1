//! The reentrant graph processor
//!
//! When a DApp calls back into itself, the callee must see the caller's
//! graph but must not mutate it until commit. This processor holds the old
//! statics in a back-buffer, replaces every reference static with an
//! ephemeral callee-space stub, and maintains the two identity maps that
//! tie the spaces together:
//!
//! - callee -> caller: faulting a callee stub needs its source
//! - caller -> callee: stubs are uniqued per caller object
//!
//! A caller instance is NEVER replaced by a callee instance, since the
//! caller's frames may hold references to it; commit copies contents callee ->
//! caller through the loopback codec, promoting only the callee objects
//! that have no caller counterpart.

use std::collections::{HashMap, VecDeque};

use crate::persistence::fees::StorageFees;
use crate::persistence::loopback::{LoopbackCodec, RefTranslator};
use crate::runtime::heap::{LoaderState, ObjectHeap, ShadowObject, EPHEMERAL_ID};
use crate::runtime::interrupt::Interrupt;
use crate::runtime::registry::ClassRegistry;
use crate::runtime::value::{ObjHandle, ShadowValue};

#[derive(Debug)]
pub struct ReentrantProcessor {
    /// Nesting level; callee stubs carry it in their loader slot
    level: u16,
    callee_to_caller: HashMap<ObjHandle, ObjHandle>,
    caller_to_callee: HashMap<ObjHandle, ObjHandle>,
    /// FIFO back-buffer of the pre-call statics, primitives and references
    previous_statics: Option<VecDeque<ShadowValue>>,
}

impl ReentrantProcessor {
    pub fn new(level: u16) -> Self {
        Self {
            level,
            callee_to_caller: HashMap::new(),
            caller_to_callee: HashMap::new(),
            previous_statics: None,
        }
    }

    /// Begin a reentrant call: push every static onto the back-buffer and
    /// overwrite each reference static with a callee-space stub backed by
    /// the original.
    pub fn capture_and_replace_statics(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        fees: &mut StorageFees<'_>,
        statics: &mut [ShadowValue],
    ) -> Result<(), Interrupt> {
        assert!(self.callee_to_caller.is_empty() && self.caller_to_callee.is_empty());
        assert!(self.previous_statics.is_none(), "capture ran twice");

        // The buffer grows slot by slot so a capture that dies partway
        // (energy exhaustion raising a stub) still reverts cleanly.
        self.previous_statics = Some(VecDeque::with_capacity(statics.len()));
        for slot in statics.iter_mut() {
            self.previous_statics
                .as_mut()
                .expect("installed above")
                .push_back(*slot);
            if let ShadowValue::Ref(Some(caller)) = *slot {
                let stub = get_or_make_callee_stub(
                    heap,
                    registry,
                    fees,
                    &mut self.caller_to_callee,
                    &mut self.callee_to_caller,
                    self.level,
                    caller,
                )?;
                *slot = ShadowValue::Ref(Some(stub));
            }
        }
        Ok(())
    }

    /// The caller object a callee stub mirrors. Used by the session to make
    /// the caller resident before the fault runs.
    pub fn caller_of(&self, callee: ObjHandle) -> ObjHandle {
        *self
            .callee_to_caller
            .get(&callee)
            .expect("callee stub without a caller mapping")
    }

    /// Fault a callee stub: pipe the (resident) caller's fields through the
    /// loopback codec, translating every reference into callee space.
    pub fn fault(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        fees: &mut StorageFees<'_>,
        callee: ObjHandle,
    ) -> Result<(), Interrupt> {
        assert_eq!(
            heap.get(callee).instance_id,
            EPHEMERAL_ID,
            "reentrant fault on a persistent object"
        );
        let caller = self.caller_of(callee);
        assert!(!heap.is_stub(caller), "caller must be resident before the callee faults");

        // The caller may have been re-classed by its own disk fault after
        // this stub was raised; mirror its concrete shape.
        let (class, identity_hash, field_count) = {
            let src = heap.get(caller);
            (src.class, src.identity_hash, src.fields.len())
        };
        {
            let dst = heap.get_mut(callee);
            dst.class = class;
            dst.identity_hash = identity_hash;
            dst.fields = vec![ShadowValue::Ref(None); field_count];
        }
        // Zero out with proper defaults before the pipe overwrites them.
        for (idx, field) in registry.info(class).layout.iter().enumerate() {
            heap.get_mut(callee).fields[idx] = ShadowValue::default_for(&field.layout.ty);
        }

        let mut pipe = LoopbackCodec::new();
        pipe.serialize_from(heap, registry, caller);
        let mut installer = StubInstaller {
            caller_to_callee: &mut self.caller_to_callee,
            callee_to_caller: &mut self.callee_to_caller,
            level: self.level,
            fees,
        };
        pipe.deserialize_into(heap, registry, callee, &mut installer)?;
        pipe.verify_done();

        heap.get_mut(callee).loader = LoaderState::Resident;
        Ok(())
    }

    /// Error path: drain the back-buffer over the statics verbatim. The
    /// callee graph becomes unreachable. A buffer shorter than the vector
    /// only occurs when the capture itself failed partway; slots past it
    /// were never touched.
    pub fn revert_to_stored(&mut self, statics: &mut [ShadowValue]) {
        let mut back_buffer = self
            .previous_statics
            .take()
            .expect("revert without a capture");
        assert!(
            back_buffer.len() <= statics.len(),
            "back-buffer longer than the statics vector"
        );
        for slot in statics.iter_mut() {
            match back_buffer.pop_front() {
                Some(value) => *slot = value,
                None => break,
            }
        }
    }

    /// Success path: treat the post-call graph as correct but prefer caller
    /// identities, copying each callee's contents into its caller
    /// counterpart and stitching in callee-only objects.
    pub fn commit_and_restore(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        statics: &mut [ShadowValue],
    ) -> Result<(), Interrupt> {
        // The back-buffer's only remaining information, which caller each
        // callee derives from, already lives in the identity maps.
        assert!(self.previous_statics.is_some(), "commit without a capture");
        self.previous_statics = None;

        let mut queue: VecDeque<ObjHandle> = VecDeque::new();
        for slot in statics.iter_mut() {
            if let ShadowValue::Ref(Some(callee)) = *slot {
                let caller =
                    map_callee_and_enqueue(heap, &self.callee_to_caller, &mut queue, callee);
                if let Some(caller) = caller {
                    *slot = ShadowValue::Ref(Some(caller));
                }
            }
        }

        let mut markers_to_clear: Vec<ObjHandle> = Vec::new();
        while let Some(callee) = queue.pop_front() {
            let caller = self.callee_to_caller.get(&callee).copied();

            let mut pipe = LoopbackCodec::new();
            pipe.serialize_from(heap, registry, callee);
            let mut mapper = CommitMapper {
                callee_to_caller: &self.callee_to_caller,
                queue: &mut queue,
            };
            match caller {
                Some(caller) => {
                    // Content copy-back; identity stays with the caller.
                    pipe.deserialize_into(heap, registry, caller, &mut mapper)?;
                }
                None => {
                    // A new object being stitched into the caller graph; its
                    // own references still need the callee -> caller rewrite.
                    pipe.deserialize_into(heap, registry, callee, &mut mapper)?;
                    markers_to_clear.push(callee);
                }
            }
            pipe.verify_done();
        }

        // Objects that survive into the caller graph must not keep the
        // done marker or later serialization would skip them.
        for handle in markers_to_clear {
            heap.get_mut(handle).loader = LoaderState::Resident;
        }
        Ok(())
    }
}

/// Unique the callee stub for a caller object, creating it on first request.
fn get_or_make_callee_stub(
    heap: &mut ObjectHeap,
    registry: &ClassRegistry,
    fees: &mut StorageFees<'_>,
    caller_to_callee: &mut HashMap<ObjHandle, ObjHandle>,
    callee_to_caller: &mut HashMap<ObjHandle, ObjHandle>,
    level: u16,
    caller: ObjHandle,
) -> Result<ObjHandle, Interrupt> {
    if let Some(existing) = caller_to_callee.get(&caller) {
        return Ok(*existing);
    }
    fees.on_stub_instantiation()?;
    let (class, identity_hash) = {
        let src = heap.get(caller);
        (src.class, src.identity_hash)
    };
    let fields = registry
        .info(class)
        .layout
        .iter()
        .map(|f| ShadowValue::default_for(&f.layout.ty))
        .collect();
    // The ephemeral id guarantees this object can never reach the store:
    // caller instances are never replaced, so the stub never joins the
    // caller graph.
    let callee = heap.alloc(ShadowObject {
        class,
        instance_id: EPHEMERAL_ID,
        loader: LoaderState::Reentrant(level),
        fields,
        payload: None,
        identity_hash,
    });
    caller_to_callee.insert(caller, callee);
    callee_to_caller.insert(callee, caller);
    Ok(callee)
}

/// Commit-direction lookup: map a callee to its caller (if any) and
/// enqueue the callee for processing exactly once, using the loader slot
/// as the done marker.
fn map_callee_and_enqueue(
    heap: &mut ObjectHeap,
    callee_to_caller: &HashMap<ObjHandle, ObjHandle>,
    queue: &mut VecDeque<ObjHandle>,
    callee: ObjHandle,
) -> Option<ObjHandle> {
    let caller = callee_to_caller.get(&callee).copied();
    // Only objects that were faulted in (or created new) this call carry
    // content worth copying; untouched stubs mirror an unchanged caller.
    if matches!(heap.loader(callee), LoaderState::Resident) {
        heap.get_mut(callee).loader = LoaderState::Done;
        queue.push_back(callee);
    }
    caller
}

/// Fault-direction translator: caller references become callee stubs.
struct StubInstaller<'a, 'h> {
    caller_to_callee: &'a mut HashMap<ObjHandle, ObjHandle>,
    callee_to_caller: &'a mut HashMap<ObjHandle, ObjHandle>,
    level: u16,
    fees: &'a mut StorageFees<'h>,
}

impl RefTranslator for StubInstaller<'_, '_> {
    fn translate(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        reference: Option<ObjHandle>,
    ) -> Result<Option<ObjHandle>, Interrupt> {
        match reference {
            None => Ok(None),
            Some(caller) => Ok(Some(get_or_make_callee_stub(
                heap,
                registry,
                self.fees,
                self.caller_to_callee,
                self.callee_to_caller,
                self.level,
                caller,
            )?)),
        }
    }
}

/// Commit-direction translator: callee references become caller references
/// where a counterpart exists; unpaired callees are promoted as-is.
struct CommitMapper<'a> {
    callee_to_caller: &'a HashMap<ObjHandle, ObjHandle>,
    queue: &'a mut VecDeque<ObjHandle>,
}

impl RefTranslator for CommitMapper<'_> {
    fn translate(
        &mut self,
        heap: &mut ObjectHeap,
        _registry: &ClassRegistry,
        reference: Option<ObjHandle>,
    ) -> Result<Option<ObjHandle>, Interrupt> {
        match reference {
            None => Ok(None),
            Some(callee) => {
                let caller =
                    map_callee_and_enqueue(heap, self.callee_to_caller, self.queue, callee);
                Ok(Some(caller.unwrap_or(callee)))
            }
        }
    }
}
