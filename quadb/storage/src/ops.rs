//! Operations on dataset containers.
//!
//! A container is a directory of generations `Data-0001`, `Data-0002`, ..., each a
//! complete dataset. The highest generation is live. Compaction writes the next
//! generation into `Data-NNNN-tmp`, renames it once complete and switches to it.
//! Backups go to `Backups/` as change logs.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use quadb_common::QuadPattern;
use quadb_transaction::execute_read;
use tracing::{info, warn};

use crate::changes::ChangeLogWriter;
use crate::connection::StoreConnection;
use crate::copy::{clone_logical_at, with_cleanup};
use crate::dataset::Dataset;
use crate::error::{StorageError, StorageResult};
use crate::location::Location;
use crate::params::StoreParams;
use crate::rebuild::clone_structural_at;
use crate::repack::{CloneStrategy, repack_with};
use crate::switchable::SwitchableDataset;

pub const DATA_PREFIX: &str = "Data-";
pub const TMP_SUFFIX: &str = "-tmp";
pub const BACKUPS_DIR: &str = "Backups";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactOptions {
    pub strategy: CloneStrategy,
    pub catch_up: bool,
    /// Release and delete the previous generation once the switch is done.
    pub delete_old: bool,
}

/// Directory name of generation `n`.
pub fn generation_name(n: u32) -> String {
    format!("{DATA_PREFIX}{n:04}")
}

/// Generation number of a `Data-NNNN` directory name.
pub fn parse_generation(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(DATA_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn generation_of(location: &Location) -> Option<u32> {
    parse_generation(location.path()?.file_name()?.to_str()?)
}

/// Opens the container at `location`.
///
/// Leftover `Data-NNNN-tmp` directories from an interrupted compaction are removed and
/// the highest generation is connected, creating `Data-0001` in an empty container. A
/// memory location holds a single dataset and has no generations.
pub fn connect_container(
    location: &Location,
    params: &StoreParams,
) -> StorageResult<SwitchableDataset> {
    let Some(container) = location.path() else {
        return Ok(SwitchableDataset::new(StoreConnection::connect(location, params)?));
    };
    fs::create_dir_all(container)?;

    let mut latest = None;
    for entry in fs::read_dir(container)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name
            .strip_suffix(TMP_SUFFIX)
            .is_some_and(|base| parse_generation(base).is_some())
        {
            info!(dir = %entry.path().display(), "removing incomplete generation");
            fs::remove_dir_all(entry.path())?;
        } else if let Some(n) = parse_generation(name) {
            latest = latest.max(Some(n));
        }
    }

    let generation = latest.unwrap_or(1);
    let live = Location::dir(container.join(generation_name(generation)));
    info!(container = %container.display(), generation, "container connected");
    let dataset = StoreConnection::connect(&live, params)?;
    Ok(SwitchableDataset::in_container(dataset, container))
}

fn container_of(switchable: &SwitchableDataset) -> StorageResult<&Path> {
    switchable
        .container()
        .ok_or_else(|| StorageError::NotAContainer(switchable.location()))
}

/// Compacts the live generation into the next one and switches to it. Returns the new
/// generation's location.
pub fn compact(switchable: &SwitchableDataset, options: CompactOptions) -> StorageResult<Location> {
    let container = container_of(switchable)?;
    let current = switchable.location();
    let generation = generation_of(&current).ok_or_else(|| StorageError::NotAContainer(current.clone()))?;
    let next = generation + 1;
    let tmp = Location::dir(container.join(format!("{}{TMP_SUFFIX}", generation_name(next))));
    let live = Location::dir(container.join(generation_name(next)));
    info!(from = generation, to = next, "compaction started");

    let repacked = repack_with(switchable, options.catch_up, |source, snapshot| {
        with_cleanup(&tmp, || {
            let built = match options.strategy {
                CloneStrategy::Logical => clone_logical_at(source, snapshot, &tmp)?,
                CloneStrategy::Structural => clone_structural_at(source, snapshot, &tmp)?,
            };
            drop(built);
            StoreConnection::release(&tmp);
            if let (Some(from), Some(to)) = (tmp.path(), live.path()) {
                fs::rename(from, to)?;
            }
            Ok(())
        })?;
        StoreConnection::connect(&live, source.params())
    });
    let old = match repacked {
        Ok(old) => old,
        Err(e) => {
            // A failed compaction must not leave a generation that would be picked as
            // live on the next connect.
            StoreConnection::release(&live);
            if let Some(dir) = live.path().filter(|p| p.exists()) {
                if let Err(remove) = fs::remove_dir_all(dir) {
                    warn!(dir = %dir.display(), error = %remove, "failed to remove generation");
                }
            }
            return Err(e);
        }
    };

    if options.delete_old {
        let old_location = old.location();
        drop(old);
        StoreConnection::release(&old_location);
        if let Some(dir) = old_location.path() {
            fs::remove_dir_all(dir)?;
            info!(dir = %dir.display(), "old generation deleted");
        }
    }
    info!(generation = next, "compaction finished");
    Ok(live)
}

/// Writes every quad of the live generation to `Backups/backup_<timestamp>.log` as a
/// change log. Returns the path written.
pub fn backup(switchable: &SwitchableDataset) -> StorageResult<PathBuf> {
    let dir = container_of(switchable)?.join(BACKUPS_DIR);
    fs::create_dir_all(&dir)?;
    let stamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let mut path = dir.join(format!("backup_{stamp}.log"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("backup_{stamp}_{n}.log"));
        n += 1;
    }

    let quads = execute_read(switchable, |txn| -> StorageResult<usize> {
        let mut writer = ChangeLogWriter::new(BufWriter::new(File::create(&path)?));
        for quad in switchable.find(txn, &QuadPattern::any())? {
            writer.add(&quad)?;
        }
        let written = writer.records() as usize;
        let file = writer.finish()?.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(written)
    })?;
    info!(path = %path.display(), quads, "backup written");
    Ok(path)
}
