//! Transaction context: who is calling what, with which data and budget.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A DApp account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const LENGTH: usize = 32;

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LENGTH {
            return None;
        }
        let mut out = [0u8; Self::LENGTH];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Everything one invocation can observe about its transaction. Nested
/// calls get a fresh context with the caller as sender and a bumped depth;
/// block fields are inherited unchanged.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    /// The DApp being invoked
    pub address: Address,
    pub sender: Address,
    /// The external account that started the whole transaction
    pub origin: Address,
    pub value: u64,
    pub data: Vec<u8>,
    pub energy_limit: u64,
    pub block_number: u64,
    pub block_epoch_seconds: u64,
    pub block_difficulty: u64,
    /// Nesting depth of this invocation; 0 for the external call
    pub depth: u16,
}

impl TransactionContext {
    /// Context for a nested call out of `self`.
    pub fn nested(
        &self,
        target: Address,
        value: u64,
        data: Vec<u8>,
        energy_limit: u64,
    ) -> Self {
        Self {
            address: target,
            sender: self.address,
            origin: self.origin,
            value,
            data,
            energy_limit,
            block_number: self.block_number,
            block_epoch_seconds: self.block_epoch_seconds,
            block_difficulty: self.block_difficulty,
            depth: self.depth + 1,
        }
    }
}
