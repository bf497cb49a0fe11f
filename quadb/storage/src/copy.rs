//! Logical clone: copies a dataset quad by quad through a write transaction on the
//! target.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use quadb_transaction::{Transaction, execute_read, execute_write};
use tracing::{info, warn};

use crate::connection::StoreConnection;
use crate::dataset::Dataset;
use crate::error::{CloneError, StorageResult};
use crate::location::Location;
use crate::store::StorageDataset;

/// Refuses a clone from `source` to `target` before anything is written.
pub fn check_clone_target(source: &Location, target: &Location) -> StorageResult<()> {
    if source == target {
        return Err(CloneError::SameLocation(target.clone()).into());
    }
    if target.has_content()? {
        let path = target.path().map(Path::to_path_buf).unwrap_or_default();
        return Err(CloneError::NotEmpty(path).into());
    }
    if StoreConnection::is_connected(target) {
        return Err(CloneError::InUse(target.clone()).into());
    }
    Ok(())
}

/// Streams every quad `source_txn` sees into `target`, in one write transaction on the
/// target. Returns the number of quads copied.
pub fn copy_quads(
    source: &StorageDataset,
    source_txn: &Transaction,
    target: &(impl Dataset + ?Sized),
) -> StorageResult<usize> {
    execute_write(target, |txn| {
        source.for_each_quad(source_txn, |quad| {
            target.add(txn, &quad)?;
            Ok(())
        })
    })
}

/// Clones what `source_txn` sees of `source` into a new dataset at `target`, with the
/// same store parameters.
pub fn clone_logical_at(
    source: &StorageDataset,
    source_txn: &Transaction,
    target: &Location,
) -> StorageResult<Arc<StorageDataset>> {
    check_clone_target(&source.location(), target)?;
    with_cleanup(target, || {
        let dataset = StoreConnection::connect(target, source.params())?;
        let copied = copy_quads(source, source_txn, dataset.as_ref())?;
        info!(source = %source.location(), %target, quads = copied, "logical clone finished");
        Ok(dataset)
    })
}

/// Clones the committed state of `source` into a new dataset at `target`.
pub fn clone_logical(source: &StorageDataset, target: &Location) -> StorageResult<Arc<StorageDataset>> {
    execute_read(source, |txn| clone_logical_at(source, txn, target))
}

/// Runs `build` and, if it fails, releases whatever it opened at `target` and removes the
/// target directory when this call created it.
pub(crate) fn with_cleanup<T>(
    target: &Location,
    build: impl FnOnce() -> StorageResult<T>,
) -> StorageResult<T> {
    let created = target.path().filter(|p| !p.exists()).map(ToOwned::to_owned);
    let result = build();
    if result.is_err() {
        StoreConnection::release(target);
        if let Some(dir) = created {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %e, "failed to remove partial clone");
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use quadb_common::{Quad, QuadPattern, Term};

    use super::*;
    use crate::error::StorageError;
    use crate::params::StoreParams;

    #[test]
    fn test_clone_target_checks() {
        let dir = tempfile::tempdir().unwrap();
        let source = Location::dir(dir.path().join("source"));
        assert!(matches!(
            check_clone_target(&source, &source),
            Err(StorageError::Clone(CloneError::SameLocation(_)))
        ));

        let full = Location::dir(dir.path().join("full"));
        fs::create_dir_all(full.path().unwrap()).unwrap();
        fs::write(full.file("keep").unwrap(), b"x").unwrap();
        assert!(matches!(
            check_clone_target(&source, &full),
            Err(StorageError::Clone(CloneError::NotEmpty(_)))
        ));

        let empty = Location::dir(dir.path().join("empty"));
        fs::create_dir_all(empty.path().unwrap()).unwrap();
        check_clone_target(&source, &empty).unwrap();
        check_clone_target(&source, &Location::mem()).unwrap();
    }

    #[test]
    fn test_clone_logical_memory() {
        let source = StorageDataset::open(Location::mem(), &StoreParams::default()).unwrap();
        let quad = Quad::triple(Term::iri("s"), Term::iri("p"), Term::literal("o"));
        execute_write(source.as_ref(), |txn| source.add(txn, &quad)).unwrap();

        let target = Location::mem();
        let clone = clone_logical(&source, &target).unwrap();
        execute_read(clone.as_ref(), |txn| -> StorageResult<()> {
            assert_eq!(clone.find(txn, &QuadPattern::any())?, vec![quad.clone()]);
            Ok(())
        })
        .unwrap();
        assert!(StoreConnection::release(&target));
    }

    #[test]
    fn test_failed_clone_removes_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = Location::dir(dir.path().join("target"));
        let result: StorageResult<()> = with_cleanup(&target, || {
            fs::create_dir_all(target.path().unwrap())?;
            fs::write(target.file("partial").unwrap(), b"x")?;
            Err(StorageError::SwitchConflict)
        });
        assert!(result.is_err());
        assert!(!target.path().unwrap().exists());
    }
}
