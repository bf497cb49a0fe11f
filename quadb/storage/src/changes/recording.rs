use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use quadb_common::{Quad, QuadPattern};
use quadb_transaction::{
    Transaction, TransactionCoordinator, TransactionListener, TransactionResult, Transactional,
    TxnId, TxnMode,
};
use tracing::error;

use super::{ChangeAction, ChangeLogWriter, ChangeRecord};
use crate::dataset::Dataset;
use crate::error::{ChangeLogError, StorageError, StorageResult};
use crate::location::Location;

struct Recorder<W: Write> {
    log: Mutex<Option<ChangeLogWriter<W>>>,
    pending: Mutex<HashMap<TxnId, Vec<ChangeRecord>>>,
    failure: Mutex<Option<StorageError>>,
}

impl<W: Write> Recorder<W> {
    fn record(&self, txn: &Transaction, action: ChangeAction, quad: &Quad) {
        self.pending
            .lock()
            .entry(txn.id())
            .or_default()
            .push(ChangeRecord::new(action, quad.clone()));
    }

    fn write(&self, records: &[ChangeRecord]) -> StorageResult<()> {
        let mut log = self.log.lock();
        let log = log.as_mut().ok_or(ChangeLogError::Finished)?;
        for record in records {
            log.write_record(record)?;
        }
        Ok(())
    }
}

impl<W: Write + Send + 'static> TransactionListener for Recorder<W> {
    fn notify_commit(&self, txn: &Transaction) {
        let Some(records) = self.pending.lock().remove(&txn.id()) else {
            return;
        };
        if let Err(e) = self.write(&records) {
            error!(txn = %txn.id(), error = %e, "failed to record committed changes");
            self.failure.lock().get_or_insert(e);
        }
    }

    fn notify_abort(&self, txn: &Transaction) {
        self.pending.lock().remove(&txn.id());
    }

    fn notify_end(&self, txn: &Transaction) {
        self.pending.lock().remove(&txn.id());
    }
}

/// Wraps a dataset and writes every committed change made through it to a change log.
///
/// Changes are buffered per transaction and reach the log when the transaction commits,
/// so aborted transactions leave no trace. Adds and deletes that change nothing are
/// recorded as `NoAdd` and `NoDelete`.
pub struct RecordingDataset<W: Write + Send + 'static> {
    inner: Arc<dyn Dataset>,
    recorder: Arc<Recorder<W>>,
    listener: Arc<dyn TransactionListener>,
}

impl<W: Write + Send + 'static> RecordingDataset<W> {
    pub fn new(inner: Arc<dyn Dataset>, out: W) -> Self {
        let recorder = Arc::new(Recorder {
            log: Mutex::new(Some(ChangeLogWriter::new(out))),
            pending: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
        });
        let listener: Arc<dyn TransactionListener> = recorder.clone();
        inner.coordinator().add_listener(listener.clone());
        Self {
            inner,
            recorder,
            listener,
        }
    }

    pub fn inner(&self) -> &Arc<dyn Dataset> {
        &self.inner
    }

    /// Stops recording, closes the log and returns its output.
    ///
    /// Fails if writing any committed change failed, since the log would then be
    /// incomplete.
    pub fn finish(&self) -> StorageResult<W> {
        self.inner.coordinator().remove_listener(&self.listener);
        let log = self.recorder.log.lock().take().ok_or(ChangeLogError::Finished)?;
        if let Some(e) = self.recorder.failure.lock().take() {
            return Err(e);
        }
        log.finish()
    }
}

impl<W: Write + Send + 'static> Transactional for RecordingDataset<W> {
    fn begin(&self, mode: TxnMode) -> TransactionResult<Transaction> {
        self.inner.begin(mode)
    }
}

impl<W: Write + Send + 'static> Dataset for RecordingDataset<W> {
    fn location(&self) -> Location {
        self.inner.location()
    }

    fn coordinator(&self) -> Arc<TransactionCoordinator> {
        self.inner.coordinator()
    }

    fn add(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool> {
        let added = self.inner.add(txn, quad)?;
        let action = if added { ChangeAction::Add } else { ChangeAction::NoAdd };
        self.recorder.record(txn, action, quad);
        Ok(added)
    }

    fn delete(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool> {
        let deleted = self.inner.delete(txn, quad)?;
        let action = if deleted {
            ChangeAction::Delete
        } else {
            ChangeAction::NoDelete
        };
        self.recorder.record(txn, action, quad);
        Ok(deleted)
    }

    fn contains(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool> {
        self.inner.contains(txn, quad)
    }

    fn find(&self, txn: &Transaction, pattern: &QuadPattern) -> StorageResult<Vec<Quad>> {
        self.inner.find(txn, pattern)
    }

    fn len(&self, txn: &Transaction) -> StorageResult<usize> {
        self.inner.len(txn)
    }
}
