mod common;

use std::fs;

use common::*;
use quadb_storage::{
    CloneError, Dataset, Location, StorageDataset, StorageError, StorageResult, StoreConnection,
    StoreParams, clone_logical, clone_structural,
};

fn populated(location: &Location, n: usize) -> StorageResult<std::sync::Arc<StorageDataset>> {
    let dataset = StoreConnection::connect(location, &StoreParams::default())?;
    add_all(dataset.as_ref(), &numbered_quads(0..n))?;
    Ok(dataset)
}

#[test]
fn test_clone_to_source_location_refused() -> StorageResult<()> {
    let dir = tempfile::tempdir()?;
    let source = Location::dir(dir.path().join("source"));
    let dataset = populated(&source, 5)?;
    let before = snapshot_files(source.path().unwrap());

    assert!(matches!(
        clone_logical(&dataset, &source),
        Err(StorageError::Clone(CloneError::SameLocation(_)))
    ));
    assert!(matches!(
        clone_structural(&dataset, &source),
        Err(StorageError::Clone(CloneError::SameLocation(_)))
    ));
    assert_eq!(snapshot_files(source.path().unwrap()), before);

    StoreConnection::release(&source);
    Ok(())
}

#[test]
fn test_clone_to_non_empty_directory_refused() -> StorageResult<()> {
    let dir = tempfile::tempdir()?;
    let source = Location::dir(dir.path().join("source"));
    let target = Location::dir(dir.path().join("target"));
    let dataset = populated(&source, 5)?;
    fs::create_dir_all(target.path().unwrap())?;
    fs::write(target.file("notes.txt").unwrap(), b"keep me")?;

    for result in [
        clone_logical(&dataset, &target),
        clone_structural(&dataset, &target),
    ] {
        assert!(matches!(
            result,
            Err(StorageError::Clone(CloneError::NotEmpty(_)))
        ));
    }
    // Nothing was written next to the existing file.
    assert_eq!(
        snapshot_files(target.path().unwrap()),
        vec![("notes.txt".to_string(), b"keep me".to_vec())]
    );
    assert!(!StoreConnection::is_connected(&target));

    StoreConnection::release(&source);
    Ok(())
}

#[test]
fn test_clone_to_connected_location_refused() -> StorageResult<()> {
    let source = Location::mem();
    let target = Location::mem();
    let dataset = populated(&source, 1)?;
    StoreConnection::connect(&target, &StoreParams::default())?;

    assert!(matches!(
        clone_logical(&dataset, &target),
        Err(StorageError::Clone(CloneError::InUse(_)))
    ));

    StoreConnection::release(&source);
    StoreConnection::release(&target);
    Ok(())
}

#[test]
fn test_structural_clone_needs_disk() -> StorageResult<()> {
    let dir = tempfile::tempdir()?;
    let source = Location::mem();
    let dataset = populated(&source, 1)?;
    assert!(matches!(
        clone_structural(&dataset, &Location::dir(dir.path().join("target"))),
        Err(StorageError::Clone(CloneError::NotDurable(_)))
    ));

    let disk = Location::dir(dir.path().join("disk"));
    let on_disk = populated(&disk, 1)?;
    assert!(matches!(
        clone_structural(&on_disk, &Location::mem()),
        Err(StorageError::Clone(CloneError::NotDurable(_)))
    ));

    StoreConnection::release(&source);
    StoreConnection::release(&disk);
    Ok(())
}

#[test]
fn test_logical_and_structural_clones_match_source() -> StorageResult<()> {
    let dir = tempfile::tempdir()?;
    let source = Location::dir(dir.path().join("source"));
    let dataset = populated(&source, 500)?;
    // Deletions leave records in the source's index segments that the clones drop.
    delete_all(dataset.as_ref(), &numbered_quads(0..100))?;
    let expected = all_quads(dataset.as_ref())?;
    assert_eq!(expected.len(), 400);

    let logical = Location::dir(dir.path().join("logical"));
    let structural = Location::dir(dir.path().join("structural"));
    let logical_clone = clone_logical(&dataset, &logical)?;
    let structural_clone = clone_structural(&dataset, &structural)?;
    assert_eq!(all_quads(logical_clone.as_ref())?, expected);
    assert_eq!(all_quads(structural_clone.as_ref())?, expected);
    assert_eq!(structural_clone.params(), dataset.params());

    // The clones are independent, writable datasets.
    add_all(structural_clone.as_ref(), &numbered_quads(1000..1001))?;
    assert_eq!(all_quads(dataset.as_ref())?, expected);
    assert_eq!(structural_clone.location(), structural);

    // And they survive a restart.
    StoreConnection::release(&structural);
    let reopened = StoreConnection::connect(&structural, &StoreParams::default())?;
    assert_eq!(all_quads(reopened.as_ref())?.len(), 401);

    for location in [&source, &logical, &structural] {
        StoreConnection::release(location);
    }
    Ok(())
}
