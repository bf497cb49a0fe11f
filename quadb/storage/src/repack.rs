//! Online repack: rebuilds the dataset behind a [`SwitchableDataset`] at a new location
//! and switches to it while readers and, optionally, writers keep running.
//!
//! The source is cloned from a read transaction begun inside a writer turn, so the
//! snapshot is exactly the last committed state. The switch happens in exclusive mode on
//! the source: no transaction is active on it when the delegate changes, and the source
//! coordinator is retired in the same step so that threads waiting to begin on it move
//! to the new dataset.
//!
//! With catch-up enabled, writers are only held off while recording is installed and
//! while the recorded changes are replayed into the new dataset. The clone itself runs
//! with writers free.

use std::io::{BufReader, Seek, SeekFrom};
use std::sync::Arc;

use quadb_transaction::{Transaction, Transactional, TxnMode};
use tracing::{info, warn};

use crate::changes::{RecordingDataset, replay};
use crate::connection::StoreConnection;
use crate::copy::clone_logical_at;
use crate::dataset::Dataset;
use crate::error::StorageResult;
use crate::location::Location;
use crate::rebuild::clone_structural_at;
use crate::store::StorageDataset;
use crate::switchable::{ActiveDataset, SwitchableDataset};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CloneStrategy {
    /// Copy quad by quad through a write transaction. Works for any location.
    #[default]
    Logical,
    /// Rebuild the files directly. Both locations must be on disk.
    Structural,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepackOptions {
    pub strategy: CloneStrategy,
    /// Let writers run during the clone and replay their changes before switching.
    pub catch_up: bool,
}

/// Repacks the dataset behind `switchable` into `target` and switches to it.
///
/// Returns the old dataset, which is retired but still connected; the caller may release
/// it and delete its files.
pub fn repack(
    switchable: &SwitchableDataset,
    target: &Location,
    options: RepackOptions,
) -> StorageResult<Arc<StorageDataset>> {
    repack_with(switchable, options.catch_up, |source, snapshot| {
        match options.strategy {
            CloneStrategy::Logical => clone_logical_at(source, snapshot, target),
            CloneStrategy::Structural => clone_structural_at(source, snapshot, target),
        }
    })
}

/// As [`repack`], with `build` making the new dataset from the source and a snapshot
/// transaction on it.
pub(crate) fn repack_with(
    switchable: &SwitchableDataset,
    catch_up: bool,
    build: impl FnOnce(&StorageDataset, &Transaction) -> StorageResult<Arc<StorageDataset>>,
) -> StorageResult<Arc<StorageDataset>> {
    let active = switchable.active();
    let source = active.storage.clone();
    info!(source = %source.location(), catch_up, "repack started");
    if catch_up {
        repack_catching_up(switchable, &active, &source, build)?;
    } else {
        repack_blocking_writers(switchable, &active, &source, build)?;
    }
    info!(
        source = %source.location(),
        target = %switchable.storage().location(),
        "repack finished"
    );
    Ok(source)
}

fn repack_blocking_writers(
    switchable: &SwitchableDataset,
    active: &Arc<ActiveDataset>,
    source: &Arc<StorageDataset>,
    build: impl FnOnce(&StorageDataset, &Transaction) -> StorageResult<Arc<StorageDataset>>,
) -> StorageResult<()> {
    source.coordinator().exec_as_writer(|| -> StorageResult<()> {
        let target = build_from_snapshot(source, build)?;
        switch_over(switchable, active, source, target)
    })?
}

fn repack_catching_up(
    switchable: &SwitchableDataset,
    active: &Arc<ActiveDataset>,
    source: &Arc<StorageDataset>,
    build: impl FnOnce(&StorageDataset, &Transaction) -> StorageResult<Arc<StorageDataset>>,
) -> StorageResult<()> {
    let coordinator = source.coordinator();
    let log = tempfile::tempfile()?;

    // Recording starts in the same writer turn as the snapshot, so every change after the
    // snapshot is in the log.
    let (recording, installed, snapshot) = coordinator.exec_as_writer(|| -> StorageResult<_> {
        let recording = Arc::new(RecordingDataset::new(active.dataset.clone(), log));
        let wrapped = ActiveDataset {
            dataset: recording.clone(),
            storage: source.clone(),
        };
        if let Err(e) = coordinator.exec_exclusive(|| switchable.change(active, wrapped))? {
            let _ = recording.finish();
            return Err(e);
        }
        let installed = switchable.active();
        let snapshot = source.begin(TxnMode::Read)?;
        Ok((recording, installed, snapshot))
    })??;

    let built = build(source, &snapshot);
    let ended = snapshot.end();
    let target = match (built, ended) {
        (Ok(target), Ok(())) => target,
        (Ok(target), Err(e)) => {
            StoreConnection::release(&target.location());
            restore(switchable, &installed, source, &recording);
            return Err(e.into());
        }
        (Err(e), _) => {
            restore(switchable, &installed, source, &recording);
            return Err(e);
        }
    };

    let caught_up = coordinator.exec_as_writer(|| -> StorageResult<()> {
        let mut log = recording.finish()?;
        log.seek(SeekFrom::Start(0))?;
        let stats = replay(BufReader::new(log), target.as_ref())?;
        info!(
            added = stats.added,
            deleted = stats.deleted,
            "caught up with writes made during the clone"
        );
        switch_over(switchable, &installed, source, target.clone())
    });
    match caught_up {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            StoreConnection::release(&target.location());
            restore(switchable, &installed, source, &recording);
            Err(e)
        }
        Err(e) => {
            StoreConnection::release(&target.location());
            restore(switchable, &installed, source, &recording);
            Err(e.into())
        }
    }
}

fn build_from_snapshot(
    source: &StorageDataset,
    build: impl FnOnce(&StorageDataset, &Transaction) -> StorageResult<Arc<StorageDataset>>,
) -> StorageResult<Arc<StorageDataset>> {
    let snapshot = source.begin(TxnMode::Read)?;
    let built = build(source, &snapshot);
    if let Err(e) = snapshot.end() {
        if let Ok(target) = &built {
            StoreConnection::release(&target.location());
        }
        return Err(e.into());
    }
    built
}

/// Drains the source, points `switchable` at `target` and retires the source. Must be
/// called while holding the source's writer slot.
fn switch_over(
    switchable: &SwitchableDataset,
    expected: &Arc<ActiveDataset>,
    source: &StorageDataset,
    target: Arc<StorageDataset>,
) -> StorageResult<()> {
    let coordinator = source.coordinator();
    let location = target.location();
    let switched = coordinator.exec_exclusive(|| -> StorageResult<()> {
        switchable.change(expected, ActiveDataset::new(target))?;
        coordinator.retire();
        Ok(())
    })?;
    if switched.is_err() {
        StoreConnection::release(&location);
    }
    switched
}

/// Puts the unwrapped source back after a failed catch-up repack.
fn restore<W: std::io::Write + Send + 'static>(
    switchable: &SwitchableDataset,
    installed: &Arc<ActiveDataset>,
    source: &Arc<StorageDataset>,
    recording: &RecordingDataset<W>,
) {
    let coordinator = source.coordinator();
    let restored = coordinator.exec_as_writer(|| {
        coordinator.exec_exclusive(|| {
            switchable.change(installed, ActiveDataset::new(source.clone()))
        })
    });
    if !matches!(restored, Ok(Ok(Ok(())))) {
        warn!(source = %source.location(), "could not restore the source after a failed repack");
    }
    // A no-op if the replay already finished it.
    let _ = recording.finish();
}
