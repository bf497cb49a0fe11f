use std::sync::Arc;

use quadb_common::{Quad, QuadPattern};
use quadb_transaction::{Transaction, TransactionCoordinator, Transactional};

use crate::error::StorageResult;
use crate::location::Location;

/// A transactional collection of quads.
///
/// Every operation runs inside a transaction obtained from [`Transactional::begin`] on the
/// same dataset. Changes need a write transaction.
pub trait Dataset: Transactional {
    fn location(&self) -> Location;

    /// The coordinator transactions on this dataset belong to.
    fn coordinator(&self) -> Arc<TransactionCoordinator>;

    /// Adds `quad`. Returns `false` if it was already present.
    fn add(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool>;

    /// Deletes `quad`. Returns `false` if it was not present.
    fn delete(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool>;

    fn contains(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool>;

    fn find(&self, txn: &Transaction, pattern: &QuadPattern) -> StorageResult<Vec<Quad>>;

    fn len(&self, txn: &Transaction) -> StorageResult<usize>;

    fn is_empty(&self, txn: &Transaction) -> StorageResult<bool> {
        Ok(self.len(txn)? == 0)
    }
}
