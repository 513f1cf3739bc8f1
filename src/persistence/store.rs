//! The object graph store
//!
//! An abstract key-value map from instance id to opaque payload. Writes are
//! buffered: nothing becomes visible until `flush_writes`, and a failed
//! transaction discards the buffer, so the committed map is only ever
//! touched by a successful top-level commit.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Reserved key of the environment record.
pub const ENVIRONMENT_KEY: u64 = u64::MAX;

/// Key of the statics vector payload (the root container, instance id 0).
pub const STATICS_KEY: u64 = 0;

pub trait GraphStore {
    fn read(&self, key: u64) -> Option<Vec<u8>>;

    /// Buffer a write; visible to `read` immediately within the transaction.
    fn write(&mut self, key: u64, bytes: Vec<u8>);

    /// Atomically commit every buffered write.
    fn flush_writes(&mut self);

    /// Drop every buffered write.
    fn discard_writes(&mut self);

    /// Cheap content hash of the committed map, for result roots.
    fn simple_hash_code(&self) -> Vec<u8>;
}

/// In-memory store backing tests and single-process deployments.
#[derive(Debug, Default, Clone)]
pub struct InMemoryGraphStore {
    committed: BTreeMap<u64, Vec<u8>>,
    pending: BTreeMap<u64, Vec<u8>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn read(&self, key: u64) -> Option<Vec<u8>> {
        self.pending
            .get(&key)
            .or_else(|| self.committed.get(&key))
            .cloned()
    }

    fn write(&mut self, key: u64, bytes: Vec<u8>) {
        self.pending.insert(key, bytes);
    }

    fn flush_writes(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (key, bytes) in pending {
            self.committed.insert(key, bytes);
        }
    }

    fn discard_writes(&mut self) {
        self.pending.clear();
    }

    fn simple_hash_code(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        for (key, bytes) in &self.committed {
            hasher.update(key.to_be_bytes());
            hasher.update((bytes.len() as u32).to_be_bytes());
            hasher.update(bytes);
        }
        hasher.finalize().to_vec()
    }
}
