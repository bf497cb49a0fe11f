//! Structural clone: rebuilds a dataset's files at a new location from a snapshot,
//! without going through transactions on the target.

use std::sync::Arc;

use quadb_transaction::{Transaction, execute_read};
use tracing::info;

use crate::connection::StoreConnection;
use crate::copy::{check_clone_target, with_cleanup};
use crate::dataset::Dataset;
use crate::error::{CloneError, StorageError, StorageResult};
use crate::location::Location;
use crate::quad_index::QuadIndex;
use crate::store::StorageDataset;

/// Rebuilds what `source_txn` sees of `source` at `target`.
///
/// Every quad index is bulk loaded from the snapshot in block-sized batches. The node
/// table is copied byte for byte up to its committed length; if writers run during the
/// copy this may include nodes committed after the snapshot, which nothing refers to.
/// The files are finished without a journal and then opened as a normal dataset.
pub fn clone_structural_at(
    source: &StorageDataset,
    source_txn: &Transaction,
    target: &Location,
) -> StorageResult<Arc<StorageDataset>> {
    let source_location = source.location();
    for location in [&source_location, target] {
        if location.is_mem() {
            return Err(CloneError::NotDurable(location.clone()).into());
        }
    }
    check_clone_target(&source_location, target)?;
    if !Arc::ptr_eq(source_txn.coordinator(), &source.coordinator()) {
        return Err(StorageError::WrongDataset(source_txn.id()));
    }

    with_cleanup(target, || {
        let params = source.params();
        if let Some(dir) = target.path() {
            std::fs::create_dir_all(dir)?;
        }
        params.save(target)?;
        source.node_table().copy_committed(target)?;
        let batch = params.records_per_block();
        for index in source.indexes() {
            let records = index.view(source_txn.id());
            let length = QuadIndex::bulk_load(target, index.name(), records.iter(), batch)?;
            info!(index = index.name(), records = records.len(), bytes = length, "index rebuilt");
        }
        let dataset = StoreConnection::connect(target, params)?;
        info!(source = %source_location, %target, "structural clone finished");
        Ok(dataset)
    })
}

/// Rebuilds the committed state of `source` at `target`.
pub fn clone_structural(
    source: &StorageDataset,
    target: &Location,
) -> StorageResult<Arc<StorageDataset>> {
    execute_read(source, |txn| clone_structural_at(source, txn, target))
}
