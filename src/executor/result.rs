//! Transaction results and the status table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Success,
    /// Catch-all VM failure
    Failed,
    FailedOutOfEnergy,
    FailedOutOfStack,
    FailedCallDepthLimit,
    FailedRevert,
    FailedInvalid,
    FailedAbort,
    FailedException,
}

/// One user log entry emitted through the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub topics: Vec<Vec<u8>>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub status: TransactionStatus,
    pub return_data: Option<Vec<u8>>,
    pub energy_used: u64,
    /// Content hash of the committed object store; successful calls only
    pub storage_root_hash: Option<Vec<u8>>,
    /// Message of the escaped user exception, when one is available
    pub uncaught_message: Option<String>,
    pub logs: Vec<LogEntry>,
}

impl TransactionResult {
    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Success
    }
}
