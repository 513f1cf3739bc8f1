//! The contract environment record
//!
//! Two counters survive between transactions: the next instance id and the
//! next identity hash code. They live under a reserved store key as a
//! 12-byte big-endian blob. The record is immutable once loaded; the
//! executor writes a fresh one on successful commit.

use crate::error::StoreError;
use crate::persistence::store::{GraphStore, ENVIRONMENT_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentState {
    pub next_instance_id: u64,
    pub next_hash_code: i32,
}

impl EnvironmentState {
    /// The state of a freshly deployed DApp: ids from 1 (0 is the statics
    /// root), hash codes from 1.
    pub fn initial() -> Self {
        Self {
            next_instance_id: 1,
            next_hash_code: 1,
        }
    }

    pub fn encode(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.next_instance_id.to_be_bytes());
        out[8..].copy_from_slice(&self.next_hash_code.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() != 12 {
            return Err(StoreError::BadEnvironmentRecord {
                length: bytes.len(),
            });
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[..8]);
        let mut hash = [0u8; 4];
        hash.copy_from_slice(&bytes[8..]);
        Ok(Self {
            next_instance_id: u64::from_be_bytes(id),
            next_hash_code: i32::from_be_bytes(hash),
        })
    }

    pub fn load<S: GraphStore>(store: &S) -> Result<Self, StoreError> {
        match store.read(ENVIRONMENT_KEY) {
            Some(bytes) => Self::decode(&bytes),
            None => Ok(Self::initial()),
        }
    }

    pub fn save<S: GraphStore>(&self, store: &mut S) {
        store.write(ENVIRONMENT_KEY, self.encode().to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::store::InMemoryGraphStore;

    #[test]
    fn test_encode_decode_round_trip() {
        let state = EnvironmentState {
            next_instance_id: 0x0102030405060708,
            next_hash_code: -7,
        };
        let bytes = state.encode();
        assert_eq!(bytes.len(), 12);
        assert_eq!(EnvironmentState::decode(&bytes).unwrap(), state);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(matches!(
            EnvironmentState::decode(&[0u8; 11]),
            Err(StoreError::BadEnvironmentRecord { length: 11 })
        ));
    }

    #[test]
    fn test_missing_record_yields_initial_state() {
        let store = InMemoryGraphStore::new();
        assert_eq!(
            EnvironmentState::load(&store).unwrap(),
            EnvironmentState::initial()
        );
    }
}
