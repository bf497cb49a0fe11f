use std::any::Any;

use crate::component_id::ComponentId;
use crate::error::ComponentError;
use crate::transaction::TxnMode;
use crate::txn_id::TxnId;

/// Per-transaction state a component hands over when a transaction is detached.
pub type ComponentState = Box<dyn Any + Send>;

/// A storage structure that takes part in coordinated transactions.
///
/// For a given transaction a component sees exactly one of
///
/// - `begin`, `commit_prepare`, `commit`, `commit_end`, `complete`
/// - `begin`, `abort`, `complete`
/// - `begin`, `complete` (a read transaction that simply ends)
///
/// `commit_prepare` is only called for write transactions and always precedes `commit`.
/// The blob returned by `commit_prepare` is written to the journal before any component's
/// `commit` runs and is handed back to [`recover`](Self::recover) if the process dies
/// before the commit completes. Recovery may replay the same blob more than once, so it
/// must describe an absolute state rather than a delta.
pub trait TransactionalComponent: Send + Sync {
    fn component_id(&self) -> &ComponentId;

    /// Called on startup instead of the recovery sequence when the journal is empty.
    fn clean_start(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    fn start_recovery(&self) -> Result<(), ComponentError>;

    fn recover(&self, state: &[u8]) -> Result<(), ComponentError>;

    fn finish_recovery(&self) -> Result<(), ComponentError>;

    fn begin(&self, txn: TxnId, mode: TxnMode) -> Result<(), ComponentError>;

    /// Makes the transaction's changes durable but not yet visible. Returns the blob to
    /// journal, or `None` when there is nothing to recover.
    fn commit_prepare(&self, txn: TxnId) -> Result<Option<Vec<u8>>, ComponentError>;

    fn commit(&self, txn: TxnId) -> Result<(), ComponentError>;

    fn commit_end(&self, txn: TxnId) -> Result<(), ComponentError>;

    fn abort(&self, txn: TxnId) -> Result<(), ComponentError>;

    /// Releases everything held for the transaction. Always the last call for `txn`.
    fn complete(&self, txn: TxnId) -> Result<(), ComponentError>;

    fn detach(&self, _txn: TxnId) -> Result<ComponentState, ComponentError> {
        Ok(Box::new(()))
    }

    fn attach(&self, _txn: TxnId, _state: ComponentState) -> Result<(), ComponentError> {
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ComponentError>;
}
