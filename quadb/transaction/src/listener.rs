use crate::transaction::Transaction;

/// Observer of transaction lifecycle events on a coordinator.
///
/// Callbacks run on the thread driving the transaction, after the coordinator has
/// finished the corresponding step. They must not call back into the same transaction.
pub trait TransactionListener: Send + Sync {
    fn notify_begin(&self, _txn: &Transaction) {}

    fn notify_prepare(&self, _txn: &Transaction) {}

    fn notify_commit(&self, _txn: &Transaction) {}

    fn notify_abort(&self, _txn: &Transaction) {}

    fn notify_end(&self, _txn: &Transaction) {}
}
