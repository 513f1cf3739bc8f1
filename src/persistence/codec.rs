//! The reflection structure codec
//!
//! Serializes and deserializes the object graph rooted at the statics
//! vector against the store, walking the per-class field layouts held by
//! the registry. References serialize as instance ids; deserialization
//! installs lazy stubs instead of materializing referents, and the first
//! field access faults the stub in through `fault`.
//!
//! Aliasing is preserved by the id -> instance table: within one task every
//! stored id resolves to exactly one heap object, so two paths to the same
//! stored object always meet at the same handle. Cycles fall out of the
//! same table: ids are assigned before recursion and the work list is a
//! queue, not the call stack.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::bytecode::FieldType;
use crate::persistence::fees::StorageFees;
use crate::persistence::store::{GraphStore, STATICS_KEY};
use crate::runtime::heap::{LoaderState, ObjectHeap, Payload, ShadowObject, EPHEMERAL_ID};
use crate::runtime::interrupt::{FailureKind, Interrupt};
use crate::runtime::registry::{ClassId, ClassRegistry, ElemKind};
use crate::runtime::value::{ObjHandle, ShadowValue};

#[derive(Debug, Default)]
pub struct GraphCodec {
    /// id -> instance uniquing table; the heart of aliasing preservation
    loaded: HashMap<u64, ObjHandle>,
}

impl GraphCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the statics vector from the store. A missing statics record
    /// means a freshly deployed DApp: every slot gets its default.
    pub fn hydrate_statics<S: GraphStore>(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        store: &S,
        fees: &mut StorageFees<'_>,
        statics: &mut Vec<ShadowValue>,
    ) -> Result<(), Interrupt> {
        let layout = registry.statics_layout();
        statics.clear();
        let bytes = match store.read(STATICS_KEY) {
            Some(bytes) => bytes,
            None => {
                for slot in &layout.slots {
                    statics.push(ShadowValue::default_for(&slot.field.ty));
                }
                return Ok(());
            }
        };
        fees.on_store_read(bytes.len())?;
        let mut reader = ByteReader::new(&bytes);
        for slot in &layout.slots {
            fees.on_field_write()?;
            let value = self.decode_value(heap, registry, fees, &mut reader, &slot.field.ty)?;
            statics.push(value);
        }
        Ok(())
    }

    /// Write the statics vector and the reachable closure back to the store.
    /// Untouched stubs are skipped: their stored records are still current.
    pub fn save_statics<S: GraphStore>(
        &mut self,
        heap: &ObjectHeap,
        registry: &ClassRegistry,
        store: &mut S,
        fees: &mut StorageFees<'_>,
        statics: &[ShadowValue],
    ) -> Result<(), Interrupt> {
        let mut queue: VecDeque<ObjHandle> = VecDeque::new();
        let mut scheduled: HashSet<ObjHandle> = HashSet::new();

        let mut root = Vec::new();
        for value in statics {
            fees.on_field_read()?;
            encode_value(heap, *value, &mut root, &mut queue, &mut scheduled);
        }
        fees.on_store_write(root.len())?;
        store.write(STATICS_KEY, root);

        while let Some(handle) = queue.pop_front() {
            let object = heap.get(handle);
            if matches!(object.loader, LoaderState::Disk | LoaderState::Reentrant(_)) {
                // Never materialized this transaction; the store already
                // holds its authoritative record.
                continue;
            }
            let bytes = self.encode_object(heap, registry, fees, handle, &mut queue, &mut scheduled)?;
            fees.on_store_write(bytes.len())?;
            store.write(object.instance_id as u64, bytes);
        }
        Ok(())
    }

    fn encode_object(
        &mut self,
        heap: &ObjectHeap,
        registry: &ClassRegistry,
        fees: &mut StorageFees<'_>,
        handle: ObjHandle,
        queue: &mut VecDeque<ObjHandle>,
        scheduled: &mut HashSet<ObjHandle>,
    ) -> Result<Vec<u8>, Interrupt> {
        let object = heap.get(handle);
        let info = registry.info(object.class);
        let mut out = Vec::new();
        write_str(&mut out, &info.name);
        out.extend_from_slice(&object.identity_hash.to_be_bytes());
        for value in &object.fields {
            fees.on_field_read()?;
            encode_value(heap, *value, &mut out, queue, scheduled);
        }
        if info.manual_persistence {
            match &object.payload {
                Some(Payload::Elements(elements)) => {
                    out.extend_from_slice(&(elements.len() as u32).to_be_bytes());
                    for value in elements {
                        encode_value(heap, *value, &mut out, queue, scheduled);
                    }
                }
                Some(Payload::Utf8(text)) => {
                    write_str(&mut out, text);
                }
                None => out.extend_from_slice(&0u32.to_be_bytes()),
            }
        }
        Ok(out)
    }

    /// Fault a disk stub: read its record, re-class to the stored concrete
    /// type if the declared type was wider, populate every field (installing
    /// further stubs), and clear the loader.
    pub fn fault<S: GraphStore>(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        store: &S,
        fees: &mut StorageFees<'_>,
        handle: ObjHandle,
    ) -> Result<(), Interrupt> {
        // A loader re-entering the instance it is already loading is an
        // implementation bug, not a user-reachable state.
        assert!(
            matches!(heap.loader(handle), LoaderState::Disk),
            "disk fault on a non-disk object"
        );
        let instance_id = heap.get(handle).instance_id as u64;
        let bytes = store
            .read(instance_id)
            .ok_or(Interrupt::Failure(FailureKind::CorruptStore))?;
        fees.on_store_read(bytes.len())?;

        let mut reader = ByteReader::new(&bytes);
        let class_name = reader.read_str()?;
        let actual = registry
            .id_of(&class_name)
            .ok_or(Interrupt::Failure(FailureKind::CorruptStore))?;
        let identity_hash = reader.read_i32()?;

        let layout: Vec<FieldType> = registry
            .info(actual)
            .layout
            .iter()
            .map(|f| f.layout.ty.clone())
            .collect();
        let manual = registry.info(actual).manual_persistence;
        let elem_kind = registry.info(actual).elem_kind;

        let mut fields = Vec::with_capacity(layout.len());
        for ty in &layout {
            fees.on_field_write()?;
            let value = self.decode_value(heap, registry, fees, &mut reader, ty)?;
            fields.push(value);
        }
        let payload = if manual {
            Some(self.decode_payload(heap, registry, fees, &mut reader, elem_kind)?)
        } else {
            None
        };

        let object = heap.get_mut(handle);
        object.class = actual;
        object.identity_hash = identity_hash;
        object.fields = fields;
        object.payload = payload;
        object.loader = LoaderState::Resident;
        Ok(())
    }

    fn decode_payload(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        fees: &mut StorageFees<'_>,
        reader: &mut ByteReader<'_>,
        elem_kind: Option<ElemKind>,
    ) -> Result<Payload, Interrupt> {
        match elem_kind {
            None => Ok(Payload::Utf8(reader.read_str()?)),
            Some(kind) => {
                let len = reader.read_u32()? as usize;
                let mut elements = Vec::with_capacity(len);
                let ty = elem_field_type(kind);
                for _ in 0..len {
                    elements.push(self.decode_value(heap, registry, fees, reader, &ty)?);
                }
                Ok(Payload::Elements(elements))
            }
        }
    }

    fn decode_value(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        fees: &mut StorageFees<'_>,
        reader: &mut ByteReader<'_>,
        ty: &FieldType,
    ) -> Result<ShadowValue, Interrupt> {
        let value = match ty {
            FieldType::Bool => ShadowValue::Bool(reader.read_u8()? != 0),
            FieldType::Byte => ShadowValue::Byte(reader.read_u8()? as i8),
            FieldType::Short => ShadowValue::Short(reader.read_u16()? as i16),
            FieldType::Char => ShadowValue::Char(reader.read_u16()?),
            FieldType::Int => ShadowValue::Int(reader.read_i32()?),
            FieldType::Long => ShadowValue::Long(reader.read_i64()?),
            FieldType::Float => ShadowValue::Float(f32::from_bits(reader.read_u32()?)),
            FieldType::Double => ShadowValue::Double(f64::from_bits(reader.read_u64()?)),
            FieldType::Ref(declared) => {
                if reader.read_u8()? == 0 {
                    ShadowValue::Ref(None)
                } else {
                    let id = reader.read_u64()?;
                    let declared_class = registry
                        .id_of(declared)
                        .ok_or(Interrupt::Failure(FailureKind::CorruptStore))?;
                    let stub = self.stub_for_id(heap, registry, fees, declared_class, id)?;
                    ShadowValue::Ref(Some(stub))
                }
            }
        };
        Ok(value)
    }

    /// One heap object per stored id; later requests return the first stub.
    fn stub_for_id(
        &mut self,
        heap: &mut ObjectHeap,
        registry: &ClassRegistry,
        fees: &mut StorageFees<'_>,
        declared: ClassId,
        id: u64,
    ) -> Result<ObjHandle, Interrupt> {
        if let Some(existing) = self.loaded.get(&id) {
            return Ok(*existing);
        }
        fees.on_stub_instantiation()?;
        let fields = registry
            .info(declared)
            .layout
            .iter()
            .map(|f| ShadowValue::default_for(&f.layout.ty))
            .collect();
        let handle = heap.alloc(ShadowObject {
            class: declared,
            instance_id: id as i64,
            loader: LoaderState::Disk,
            fields,
            payload: None,
            identity_hash: 0,
        });
        self.loaded.insert(id, handle);
        Ok(handle)
    }
}

fn elem_field_type(kind: ElemKind) -> FieldType {
    match kind {
        ElemKind::Bool => FieldType::Bool,
        ElemKind::Byte => FieldType::Byte,
        ElemKind::Short => FieldType::Short,
        ElemKind::Char => FieldType::Char,
        ElemKind::Int => FieldType::Int,
        ElemKind::Long => FieldType::Long,
        ElemKind::Float => FieldType::Float,
        ElemKind::Double => FieldType::Double,
        ElemKind::Ref => FieldType::Ref("ember/lang/Object".to_string()),
    }
}

fn encode_value(
    heap: &ObjectHeap,
    value: ShadowValue,
    out: &mut Vec<u8>,
    queue: &mut VecDeque<ObjHandle>,
    scheduled: &mut HashSet<ObjHandle>,
) {
    match value {
        ShadowValue::Bool(b) => out.push(b as u8),
        ShadowValue::Byte(v) => out.push(v as u8),
        ShadowValue::Short(v) => out.extend_from_slice(&v.to_be_bytes()),
        ShadowValue::Char(v) => out.extend_from_slice(&v.to_be_bytes()),
        ShadowValue::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        ShadowValue::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        ShadowValue::Float(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        ShadowValue::Double(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        ShadowValue::Ref(None) => out.push(0),
        ShadowValue::Ref(Some(handle)) => {
            let object = heap.get(handle);
            // A callee-space stub in a graph headed for the store means the
            // reentrant commit failed to translate it.
            assert!(
                object.instance_id != EPHEMERAL_ID,
                "ephemeral callee object reached the disk codec"
            );
            out.push(1);
            out.extend_from_slice(&(object.instance_id as u64).to_be_bytes());
            if scheduled.insert(handle) {
                queue.push_back(handle);
            }
        }
    }
}

fn write_str(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(&(text.len() as u32).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Interrupt> {
        if self.pos + n > self.bytes.len() {
            return Err(Interrupt::Failure(FailureKind::CorruptStore));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, Interrupt> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, Interrupt> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32, Interrupt> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, Interrupt> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32, Interrupt> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64, Interrupt> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_str(&mut self) -> Result<String, Interrupt> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Interrupt::Failure(FailureKind::CorruptStore))
    }
}
