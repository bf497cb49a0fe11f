//! Running a transaction on a dedicated worker thread.
//!
//! [`AsyncTxnAction::start`] returns only once the worker holds a transaction, so the
//! caller can rely on the transaction's admission (for example, that the writer slot is
//! taken) before deciding when the action runs. [`AsyncTxnAction::run`] then releases
//! the worker and waits for it to finish.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::Transactional;
use crate::error::{ComponentError, TransactionError, TransactionResult};
use crate::transaction::{Transaction, TxnMode};
use crate::txn_id::TxnId;

/// How a write transaction is finished after its action succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnFinish {
    Commit,
    Abort,
}

pub type TxnAction = Box<dyn FnOnce(&Transaction) -> Result<(), ComponentError> + Send>;

pub struct AsyncTxnAction {
    txn: TxnId,
    go: Option<flume::Sender<()>>,
    done: flume::Receiver<TransactionResult<()>>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncTxnAction {
    /// Spawns a worker that begins a `mode` transaction on `target`, and returns once the
    /// transaction has started.
    ///
    /// Starting a write handoff while the calling thread holds the writer slot of the
    /// same target blocks forever.
    pub fn start<T, F>(
        target: Arc<T>,
        mode: TxnMode,
        finish: TxnFinish,
        action: F,
    ) -> TransactionResult<Self>
    where
        T: Transactional + ?Sized + 'static,
        F: FnOnce(&Transaction) -> Result<(), ComponentError> + Send + 'static,
    {
        let (started_tx, started_rx) = flume::bounded(1);
        let (go_tx, go_rx) = flume::bounded::<()>(1);
        let (done_tx, done_rx) = flume::bounded(1);

        let worker = thread::Builder::new()
            .name("quadb-txn-handoff".into())
            .spawn(move || {
                let txn = match target.begin(mode) {
                    Ok(txn) => txn,
                    Err(e) => {
                        let _ = started_tx.send(Err(e));
                        return;
                    }
                };
                let _ = started_tx.send(Ok(txn.id()));
                if go_rx.recv().is_err() {
                    debug!(txn = %txn.id(), "handoff released without running");
                    if let Err(e) = txn.end() {
                        warn!(txn = %txn.id(), error = %e, "failed to end handoff transaction");
                    }
                    return;
                }
                let _ = done_tx.send(execute(&txn, finish, Box::new(action)));
            })
            .map_err(TransactionError::Spawn)?;

        match started_rx.recv() {
            Ok(Ok(txn)) => Ok(Self {
                txn,
                go: Some(go_tx),
                done: done_rx,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(TransactionError::WorkerLost)
            }
        }
    }

    /// Id of the transaction held by the worker.
    pub fn txn_id(&self) -> TxnId {
        self.txn
    }

    /// Runs the action and finishes the transaction, returning any failure the worker
    /// hit. Consumes the handle: an action runs at most once.
    pub fn run(mut self) -> TransactionResult<()> {
        if let Some(go) = self.go.take() {
            go.send(()).map_err(|_| TransactionError::WorkerLost)?;
        }
        let result = self
            .done
            .recv()
            .map_err(|_| TransactionError::WorkerLost)?;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        result
    }
}

impl Drop for AsyncTxnAction {
    fn drop(&mut self) {
        // Closing the channel tells an unrun worker to end its transaction.
        self.go.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn execute(txn: &Transaction, finish: TxnFinish, action: TxnAction) -> TransactionResult<()> {
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| action(txn))) {
        Ok(result) => result.map_err(TransactionError::ActionFailed),
        Err(payload) => Err(TransactionError::ActionFailed(panic_message(payload).into())),
    };

    let finished = match outcome {
        Err(e) => {
            if txn.is_write() {
                if let Err(abort) = txn.abort() {
                    warn!(txn = %txn.id(), error = %abort, "abort after failed action failed");
                }
            }
            Err(e)
        }
        Ok(()) if txn.is_write() && finish == TxnFinish::Commit => txn.commit(),
        Ok(()) if txn.is_write() => txn.abort(),
        Ok(()) => Ok(()),
    };
    let ended = txn.end();
    finished.and(ended)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
