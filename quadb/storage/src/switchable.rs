//! A dataset handle whose backing dataset can be replaced while it is in use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use quadb_common::{Quad, QuadPattern};
use quadb_transaction::{
    Transaction, TransactionCoordinator, TransactionError, TransactionResult, Transactional,
    TxnMode,
};
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::error::{StorageError, StorageResult};
use crate::location::Location;
use crate::store::StorageDataset;

/// The delegate a [`SwitchableDataset`] currently forwards to.
///
/// `dataset` is what operations go through. It is usually `storage` itself, but may be a
/// wrapper around it, such as a recording dataset during a repack.
pub struct ActiveDataset {
    pub dataset: Arc<dyn Dataset>,
    pub storage: Arc<StorageDataset>,
}

impl ActiveDataset {
    pub fn new(storage: Arc<StorageDataset>) -> Self {
        Self {
            dataset: storage.clone(),
            storage,
        }
    }
}

pub struct SwitchableDataset {
    current: ArcSwap<ActiveDataset>,
    container: Option<PathBuf>,
}

impl SwitchableDataset {
    pub fn new(storage: Arc<StorageDataset>) -> Self {
        Self {
            current: ArcSwap::from_pointee(ActiveDataset::new(storage)),
            container: None,
        }
    }

    /// A handle on the live generation of the container at `container`.
    pub fn in_container(storage: Arc<StorageDataset>, container: impl Into<PathBuf>) -> Self {
        Self {
            current: ArcSwap::from_pointee(ActiveDataset::new(storage)),
            container: Some(container.into()),
        }
    }

    pub fn container(&self) -> Option<&Path> {
        self.container.as_deref()
    }

    pub fn active(&self) -> Arc<ActiveDataset> {
        self.current.load_full()
    }

    pub fn get(&self) -> Arc<dyn Dataset> {
        self.current.load().dataset.clone()
    }

    pub fn storage(&self) -> Arc<StorageDataset> {
        self.current.load().storage.clone()
    }

    /// Forwards to `storage` from now on. Returns the previous delegate.
    pub fn set(&self, storage: Arc<StorageDataset>) -> Arc<ActiveDataset> {
        self.swap(ActiveDataset::new(storage))
    }

    /// Forwards to `dataset`, a wrapper around `storage`.
    pub fn set_wrapped(
        &self,
        dataset: Arc<dyn Dataset>,
        storage: Arc<StorageDataset>,
    ) -> Arc<ActiveDataset> {
        self.swap(ActiveDataset { dataset, storage })
    }

    /// Replaces `expected` with `new`, failing if the delegate is no longer `expected`.
    pub fn change(&self, expected: &Arc<ActiveDataset>, new: ActiveDataset) -> StorageResult<()> {
        let previous = self.current.compare_and_swap(expected, Arc::new(new));
        if !Arc::ptr_eq(&previous, expected) {
            return Err(StorageError::SwitchConflict);
        }
        info!(location = %self.current.load().storage.location(), "dataset switched");
        Ok(())
    }

    fn swap(&self, new: ActiveDataset) -> Arc<ActiveDataset> {
        let location = new.storage.location();
        let previous = self.current.swap(Arc::new(new));
        debug!(%location, "delegate replaced");
        previous
    }
}

impl Transactional for SwitchableDataset {
    /// Begins on the current delegate. If that delegate was retired by a switch, the new
    /// one is tried instead.
    fn begin(&self, mode: TxnMode) -> TransactionResult<Transaction> {
        loop {
            let active = self.current.load_full();
            match active.dataset.begin(mode) {
                Err(TransactionError::Retired) => {
                    if Arc::ptr_eq(&active, &self.current.load()) {
                        return Err(TransactionError::Retired);
                    }
                    debug!("delegate retired, retrying on its replacement");
                }
                result => return result,
            }
        }
    }
}

impl Dataset for SwitchableDataset {
    fn location(&self) -> Location {
        self.current.load().storage.location()
    }

    fn coordinator(&self) -> Arc<TransactionCoordinator> {
        self.current.load().dataset.coordinator()
    }

    fn add(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool> {
        self.get().add(txn, quad)
    }

    fn delete(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool> {
        self.get().delete(txn, quad)
    }

    fn contains(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool> {
        self.get().contains(txn, quad)
    }

    fn find(&self, txn: &Transaction, pattern: &QuadPattern) -> StorageResult<Vec<Quad>> {
        self.get().find(txn, pattern)
    }

    fn len(&self, txn: &Transaction) -> StorageResult<usize> {
        self.get().len(txn)
    }
}
