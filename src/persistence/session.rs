//! The per-DApp persistence session
//!
//! One session exists per address per task. It owns the disk codec and the
//! stack of reentrant processors for nested same-address calls, and
//! dispatches lazy-load faults on the loader recorded in each object: a
//! disk stub faults through the codec, a callee stub faults through its
//! processor, after recursively making its caller resident, which may
//! itself reach all the way down to the store.

use crate::persistence::codec::GraphCodec;
use crate::persistence::fees::StorageFees;
use crate::persistence::reentrant::ReentrantProcessor;
use crate::persistence::store::GraphStore;
use crate::runtime::heap::{LoaderState, ObjectHeap};
use crate::runtime::interrupt::Interrupt;
use crate::runtime::registry::ClassRegistry;
use crate::runtime::value::{ObjHandle, ShadowValue};

#[derive(Debug, Default)]
pub struct PersistenceSession {
    pub codec: GraphCodec,
    reentrant: Vec<ReentrantProcessor>,
}

impl PersistenceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a reentrant call: push a processor, then capture the statics.
    /// The processor goes on first so a capture that fails partway is still
    /// reverted by the usual error path.
    pub fn capture(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        fees: &mut StorageFees<'_>,
        statics: &mut [ShadowValue],
    ) -> Result<(), Interrupt> {
        let level = self.reentrant.len() as u16;
        self.reentrant.push(ReentrantProcessor::new(level));
        self.reentrant
            .last_mut()
            .expect("pushed above")
            .capture_and_replace_statics(heap, registry, fees, statics)
    }

    /// Commit the innermost reentrant call and retire its processor.
    pub fn commit_top(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        statics: &mut [ShadowValue],
    ) -> Result<(), Interrupt> {
        let mut processor = self
            .reentrant
            .pop()
            .expect("commit without an active reentrant call");
        processor.commit_and_restore(heap, registry, statics)
    }

    /// Revert the innermost reentrant call and retire its processor.
    pub fn revert_top(&mut self, statics: &mut [ShadowValue]) {
        let mut processor = self
            .reentrant
            .pop()
            .expect("revert without an active reentrant call");
        processor.revert_to_stored(statics);
    }

    pub fn reentrant_depth(&self) -> usize {
        self.reentrant.len()
    }

    /// Make an object resident, faulting through whatever loader it carries.
    /// Idempotent: a resident object returns immediately, so n accesses
    /// touch the store at most once.
    pub fn ensure_loaded<S: GraphStore>(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        store: &S,
        fees: &mut StorageFees<'_>,
        handle: ObjHandle,
    ) -> Result<(), Interrupt> {
        match heap.loader(handle) {
            LoaderState::Resident | LoaderState::Done => Ok(()),
            LoaderState::Disk => self.codec.fault(heap, registry, store, fees, handle),
            LoaderState::Reentrant(level) => {
                let caller = self.reentrant[level as usize].caller_of(handle);
                self.ensure_loaded(heap, registry, store, fees, caller)?;
                self.reentrant[level as usize].fault(heap, registry, fees, handle)
            }
        }
    }
}
