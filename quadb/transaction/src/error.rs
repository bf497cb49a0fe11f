use std::io;

use thiserror::Error;

use crate::transaction::TxnState;
use crate::txn_id::TxnId;

/// Error raised by a [`TransactionalComponent`](crate::TransactionalComponent).
///
/// Components own their error types; the coordinator only needs to report them.
pub type ComponentError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type TransactionResult<T> = Result<T, TransactionError>;
pub type JournalResult<T> = Result<T, JournalError>;

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("component {component} failed during {phase}: {source}")]
    Component {
        component: String,
        phase: &'static str,
        #[source]
        source: ComponentError,
    },

    #[error("component {component} failed to commit after the journal was written: {source}")]
    InternalConsistency {
        component: String,
        #[source]
        source: ComponentError,
    },

    #[error("coordinator needs recovery before new transactions can start")]
    NeedsRecovery,

    #[error("coordinator has been retired")]
    Retired,

    #[error("coordinator has not been started")]
    NotStarted,

    #[error("coordinator already started")]
    AlreadyStarted,

    #[error("component configuration is locked")]
    ConfigurationLocked,

    #[error("component {0} is already registered")]
    DuplicateComponent(String),

    #[error("transaction {0} is read-only")]
    ReadOnly(TxnId),

    #[error("transaction {txn} is {state:?}")]
    InvalidState { txn: TxnId, state: TxnState },

    #[error("transaction {0} belongs to another coordinator")]
    ForeignTransaction(TxnId),

    #[error("txn-id overflow, reached {0}")]
    TxnIdOverflow(u64),

    #[error("action failed: {0}")]
    ActionFailed(#[source] ComponentError),

    #[error("handoff worker exited unexpectedly")]
    WorkerLost,

    #[error("failed to spawn handoff worker: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("checksum mismatch in entry at offset {offset}")]
    ChecksumMismatch { offset: u64 },

    #[error("truncated entry at offset {offset}")]
    Truncated { offset: u64 },

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
}
