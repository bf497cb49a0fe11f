use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coordinator::{CoordinatorState, TransactionCoordinator};
use crate::error::TransactionResult;
use crate::txn_id::TxnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    Active,
    /// Suspended by [`TransactionCoordinator::detach`]; must be attached before use.
    Detached,
    Committed,
    Aborted,
    Ended,
}

/// A transaction issued by a [`TransactionCoordinator`].
///
/// A transaction is finished by [`end`](Self::end), after an optional
/// [`commit`](Self::commit) or [`abort`](Self::abort). A write transaction that ends
/// without committing is aborted. Dropping a transaction that was never ended ends it,
/// so the writer slot cannot leak.
pub struct Transaction {
    id: TxnId,
    mode: TxnMode,
    data_version: u64,
    state: Mutex<TxnState>,
    coordinator: Arc<TransactionCoordinator>,
}

impl Transaction {
    pub(crate) fn new(
        id: TxnId,
        mode: TxnMode,
        data_version: u64,
        coordinator: Arc<TransactionCoordinator>,
    ) -> Self {
        Self {
            id,
            mode,
            data_version,
            state: Mutex::new(TxnState::Active),
            coordinator,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        self.mode == TxnMode::Write
    }

    /// The coordinator's data version when this transaction started.
    pub fn data_version(&self) -> u64 {
        self.data_version
    }

    pub fn state(&self) -> TxnState {
        *self.state.lock()
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    pub fn commit(&self) -> TransactionResult<()> {
        self.coordinator.commit(self)
    }

    pub fn abort(&self) -> TransactionResult<()> {
        self.coordinator.abort(self)
    }

    pub fn end(&self) -> TransactionResult<()> {
        self.coordinator.end(self)
    }

    /// Suspends the transaction so it can be resumed elsewhere with
    /// [`TransactionCoordinator::attach`].
    pub fn detach(self) -> TransactionResult<CoordinatorState> {
        Arc::clone(&self.coordinator).detach(self)
    }

    /// Moves from `from` to `to`. Returns the state found if it was not `from`.
    pub(crate) fn transition(&self, from: TxnState, to: TxnState) -> Result<(), TxnState> {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            Ok(())
        } else {
            Err(*state)
        }
    }

    pub(crate) fn set_state(&self, to: TxnState) -> TxnState {
        std::mem::replace(&mut *self.state.lock(), to)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("data_version", &self.data_version)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let state = self.state();
        if state == TxnState::Ended {
            return;
        }
        if state == TxnState::Active && self.is_write() {
            warn!(txn = %self.id, "write transaction dropped without end, aborting");
        }
        if let Err(e) = self.coordinator.end(self) {
            warn!(txn = %self.id, error = %e, "failed to end dropped transaction");
        }
    }
}
