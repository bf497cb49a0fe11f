mod common;

use std::fs::{self, File};
use std::io::BufReader;

use common::*;
use quadb_storage::ops::{BACKUPS_DIR, generation_name};
use quadb_storage::{
    CloneStrategy, CompactOptions, Dataset, Location, StorageDataset, StorageResult,
    StoreConnection, StoreParams, backup, compact, connect_container, replay,
};

#[test]
fn test_empty_container_starts_at_first_generation() -> StorageResult<()> {
    let dir = tempfile::tempdir()?;
    let container = Location::dir(dir.path());
    let switchable = connect_container(&container, &StoreParams::default())?;
    assert_eq!(switchable.container(), container.path());
    assert_eq!(
        switchable.location(),
        Location::dir(dir.path().join(generation_name(1)))
    );
    StoreConnection::release(&switchable.location());
    Ok(())
}

#[test]
fn test_connect_picks_latest_and_removes_leftovers() -> StorageResult<()> {
    let dir = tempfile::tempdir()?;
    for name in ["Data-0001", "Data-0003", "Data-0004-tmp", "Backups"] {
        fs::create_dir_all(dir.path().join(name))?;
    }
    fs::write(dir.path().join("Data-0004-tmp").join("partial.dat"), b"x")?;

    let switchable = connect_container(&Location::dir(dir.path()), &StoreParams::default())?;
    assert_eq!(
        switchable.location(),
        Location::dir(dir.path().join("Data-0003"))
    );
    assert!(!dir.path().join("Data-0004-tmp").exists());
    assert!(dir.path().join("Data-0001").exists());
    assert!(dir.path().join("Backups").exists());
    StoreConnection::release(&switchable.location());
    Ok(())
}

#[test]
fn test_compact_moves_to_next_generation() -> StorageResult<()> {
    let dir = tempfile::tempdir()?;
    let container = Location::dir(dir.path());
    let switchable = connect_container(&container, &StoreParams::default())?;
    add_all(&switchable, &numbered_quads(0..200))?;
    delete_all(&switchable, &numbered_quads(0..150))?;

    // 1. Compact, keeping the old generation
    let second = compact(&switchable, CompactOptions::default())?;
    assert_eq!(second, Location::dir(dir.path().join("Data-0002")));
    assert_eq!(switchable.location(), second);
    assert_eq!(all_quads(&switchable)?, sorted(numbered_quads(150..200)));
    assert!(dir.path().join("Data-0001").exists());
    assert!(!dir.path().join("Data-0002-tmp").exists());

    // 2. Compact structurally with catch-up, deleting the old generation
    let third = compact(
        &switchable,
        CompactOptions {
            strategy: CloneStrategy::Structural,
            catch_up: true,
            delete_old: true,
        },
    )?;
    assert_eq!(third, Location::dir(dir.path().join("Data-0003")));
    assert!(!dir.path().join("Data-0002").exists());
    add_all(&switchable, &numbered_quads(500..501))?;

    // 3. Reconnecting finds the latest generation
    StoreConnection::release(&third);
    StoreConnection::release(&Location::dir(dir.path().join("Data-0001")));
    let reconnected = connect_container(&container, &StoreParams::default())?;
    assert_eq!(reconnected.location(), third);
    let mut expected = numbered_quads(150..200);
    expected.push(numbered_quad(500));
    assert_eq!(all_quads(&reconnected)?, sorted(expected));

    StoreConnection::release(&third);
    Ok(())
}

#[test]
fn test_backup_restores_into_fresh_dataset() -> StorageResult<()> {
    let dir = tempfile::tempdir()?;
    let switchable = connect_container(&Location::dir(dir.path()), &StoreParams::default())?;
    let quads = numbered_quads(0..40);
    add_all(&switchable, &quads)?;

    let path = backup(&switchable)?;
    assert_eq!(path.parent(), Some(dir.path().join(BACKUPS_DIR).as_path()));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("backup_") && name.ends_with(".log"), "{name}");

    // A second backup in the same second gets its own file.
    let again = backup(&switchable)?;
    assert_ne!(path, again);

    let restored = StorageDataset::open(Location::mem(), &StoreParams::default())?;
    let stats = replay(BufReader::new(File::open(&path)?), restored.as_ref())?;
    assert_eq!(stats.added, 40);
    assert_eq!(all_quads(restored.as_ref())?, sorted(quads));

    StoreConnection::release(&switchable.location());
    Ok(())
}
