//! Transaction coordination for quadb storage.
//!
//! A [`TransactionCoordinator`] drives a set of [`TransactionalComponent`]s through a
//! two-phase commit backed by a [`Journal`], admitting many readers and one writer at a
//! time. Everything here is independent of what the components store.

use std::sync::Arc;

pub mod component;
pub mod component_id;
pub mod coordinator;
pub mod error;
pub mod handoff;
pub mod journal;
pub mod listener;
pub mod transaction;
pub mod txn_id;

pub use component::{ComponentState, TransactionalComponent};
pub use component_id::ComponentId;
pub use coordinator::{CoordinatorState, CoordinatorStats, TransactionCoordinator};
pub use error::{ComponentError, JournalError, TransactionError, TransactionResult};
pub use handoff::{AsyncTxnAction, TxnFinish};
pub use journal::{Journal, JournalEntry};
pub use listener::TransactionListener;
pub use transaction::{Transaction, TxnMode, TxnState};
pub use txn_id::{TxnId, TxnIdGenerator};

/// Anything transactions can be started on.
pub trait Transactional: Send + Sync {
    fn begin(&self, mode: TxnMode) -> TransactionResult<Transaction>;
}

impl Transactional for TransactionCoordinator {
    fn begin(&self, mode: TxnMode) -> TransactionResult<Transaction> {
        TransactionCoordinator::begin(self, mode)
    }
}

impl<T: Transactional + ?Sized> Transactional for Arc<T> {
    fn begin(&self, mode: TxnMode) -> TransactionResult<Transaction> {
        (**self).begin(mode)
    }
}

/// Runs `action` in a read transaction.
pub fn execute_read<T, E, F>(target: &(impl Transactional + ?Sized), action: F) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<TransactionError>,
{
    let txn = target.begin(TxnMode::Read)?;
    let result = action(&txn);
    txn.end()?;
    result
}

/// Runs `action` in a write transaction, committing when it returns `Ok` and aborting
/// otherwise.
pub fn execute_write<T, E, F>(target: &(impl Transactional + ?Sized), action: F) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<TransactionError>,
{
    let txn = target.begin(TxnMode::Write)?;
    match action(&txn) {
        Ok(value) => {
            txn.commit()?;
            txn.end()?;
            Ok(value)
        }
        Err(e) => {
            txn.abort()?;
            txn.end()?;
            Err(e)
        }
    }
}
