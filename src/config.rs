//! VM configuration and the opaque energy schedule
//!
//! Every limit that nodes must agree on lives here. The schedule values are
//! consensus inputs: changing any of them changes every metered result, so
//! they are carried as plain data rather than derived from the environment.

use serde::{Deserialize, Serialize};

/// Per-node execution limits and fee schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmConfig {
    /// Hard ceiling on interpreter frame depth within one task
    pub max_stack_depth: u16,

    /// Hard ceiling on nested call/create depth within one transaction
    pub max_call_depth: u16,

    /// The fee table used by metering, persistence, and the bridge
    pub schedule: EnergySchedule,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 48,
            max_call_depth: 10,
            schedule: EnergySchedule::default(),
        }
    }
}

/// The energy cost table. The concrete values are opaque consensus inputs;
/// the fields name the sites that charge them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergySchedule {
    /// Base cost of one simple instruction
    pub step: u64,
    /// Local load/store and operand-stack shuffling
    pub memory_op: u64,
    /// Field reads and writes during execution
    pub field_access: u64,
    /// Method invocation overhead
    pub invoke: u64,
    /// Branch or jump
    pub branch: u64,
    /// Throwing an exception
    pub throw: u64,
    /// Fixed part of any allocation
    pub allocation_base: u64,
    /// Per byte of allocated object or array body
    pub allocation_per_byte: u64,
    /// Fixed part of a store read during hydration
    pub storage_read_base: u64,
    /// Per byte of payload read from the store
    pub storage_read_per_byte: u64,
    /// Fixed part of a store write during commit
    pub storage_write_base: u64,
    /// Per byte of payload written to the store
    pub storage_write_per_byte: u64,
    /// Materializing a lazy stub
    pub stub_instantiation: u64,
    /// Per field transcribed by the persistence codecs
    pub codec_field: u64,
    /// Fixed overhead of any runtime bridge operation
    pub bridge_base: u64,
    /// Per byte hashed by the bridge hash primitives
    pub hash_per_byte: u64,
    /// Fixed part of a user log entry
    pub log_base: u64,
    /// Per byte of user log topics and data
    pub log_per_byte: u64,
    /// Per byte of code accepted at deployment
    pub deploy_per_byte: u64,
}

impl Default for EnergySchedule {
    fn default() -> Self {
        Self {
            step: 1,
            memory_op: 3,
            field_access: 5,
            invoke: 20,
            branch: 4,
            throw: 30,
            allocation_base: 32,
            allocation_per_byte: 1,
            storage_read_base: 100,
            storage_read_per_byte: 1,
            storage_write_base: 200,
            storage_write_per_byte: 2,
            stub_instantiation: 50,
            codec_field: 5,
            bridge_base: 100,
            hash_per_byte: 2,
            log_base: 375,
            log_per_byte: 8,
            deploy_per_byte: 10,
        }
    }
}
