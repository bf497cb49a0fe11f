use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use miette::{IntoDiagnostic, Result, WrapErr, miette};
use quadb_storage::ops::parse_generation;
use quadb_storage::params::PARAMS_FILE;
use quadb_storage::{
    CloneStrategy, CompactOptions, Dataset, Location, StoreConnection, StoreParams,
    SwitchableDataset, backup, clone_logical, clone_structural, compact, connect_container,
    replay,
};
use quadb_transaction::execute_read;
use tracing::info;

/// Maintenance commands for quadb datasets and containers.
#[derive(Debug, Parser)]
#[command(name = "quadb", version)]
pub enum Cli {
    /// Compact a container into its next generation while it stays usable.
    Compact {
        container: PathBuf,
        /// Copy quad by quad instead of rebuilding the index files.
        #[arg(long)]
        logical: bool,
        /// Let writers continue during the copy and replay their changes afterwards.
        #[arg(long)]
        catch_up: bool,
        /// Delete the previous generation once the new one is live.
        #[arg(long)]
        delete_old: bool,
    },
    /// Clone a dataset into an empty directory.
    Clone {
        source: PathBuf,
        target: PathBuf,
        /// Rebuild the index files instead of copying quad by quad.
        #[arg(long)]
        structural: bool,
    },
    /// Write every quad of a container's live generation to a change log under `Backups/`.
    Backup { container: PathBuf },
    /// Apply a change log to the dataset at a location, creating it if needed.
    Replay { log: PathBuf, location: PathBuf },
    /// Print counts for a dataset or container.
    Stats { location: PathBuf },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self {
            Cli::Compact {
                container,
                logical,
                catch_up,
                delete_old,
            } => {
                let switchable = open_container(&container)?;
                let options = CompactOptions {
                    strategy: if logical {
                        CloneStrategy::Logical
                    } else {
                        CloneStrategy::Structural
                    },
                    catch_up,
                    delete_old,
                };
                info!(container = %container.display(), ?options, "compacting");
                let live = compact(&switchable, options)
                    .into_diagnostic()
                    .wrap_err("compaction failed")?;
                println!("compacted into {live}");
                StoreConnection::release(&live);
                Ok(())
            }
            Cli::Clone {
                source,
                target,
                structural,
            } => {
                if !is_dataset(&source) {
                    return Err(miette!("no dataset at {}", source.display()));
                }
                let source = Location::dir(source);
                let target = Location::dir(target);
                let dataset = StoreConnection::connect(&source, &StoreParams::default())
                    .into_diagnostic()
                    .wrap_err_with(|| format!("cannot open {source}"))?;
                info!(%source, %target, structural, "cloning");
                let cloned = if structural {
                    clone_structural(&dataset, &target)
                } else {
                    clone_logical(&dataset, &target)
                };
                cloned.into_diagnostic().wrap_err("clone failed")?;
                println!("cloned {source} into {target}");
                StoreConnection::release(&source);
                StoreConnection::release(&target);
                Ok(())
            }
            Cli::Backup { container } => {
                let switchable = open_container(&container)?;
                let path = backup(&switchable)
                    .into_diagnostic()
                    .wrap_err("backup failed")?;
                println!("backup written to {}", path.display());
                StoreConnection::release(&switchable.location());
                Ok(())
            }
            Cli::Replay { log, location } => {
                let input = File::open(&log)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("cannot open {}", log.display()))?;
                let location = Location::dir(location);
                let dataset = StoreConnection::connect(&location, &StoreParams::default())
                    .into_diagnostic()
                    .wrap_err_with(|| format!("cannot open {location}"))?;
                let stats = replay(BufReader::new(input), dataset.as_ref())
                    .into_diagnostic()
                    .wrap_err("replay failed")?;
                println!(
                    "added {}, deleted {}, skipped {}",
                    stats.added, stats.deleted, stats.skipped
                );
                StoreConnection::release(&location);
                Ok(())
            }
            Cli::Stats { location } => {
                let switchable = open_any(&location)?;
                let storage = switchable.storage();
                let quads = execute_read(&switchable, |txn| switchable.len(txn))
                    .into_diagnostic()?;
                println!("location: {}", storage.location());
                println!("quads: {quads}");
                println!("nodes: {}", storage.node_table().len());
                println!("indexes: {}", storage.params().quad_indexes.join(" "));
                println!("data version: {}", storage.coordinator().data_version());
                StoreConnection::release(&storage.location());
                Ok(())
            }
        }
    }
}

fn is_dataset(path: &Path) -> bool {
    path.join(PARAMS_FILE).is_file()
}

fn has_generations(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok_and(|entries| {
        entries.flatten().any(|entry| {
            entry.path().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .and_then(parse_generation)
                    .is_some()
        })
    })
}

/// Opens an existing container. Unlike the library call, never creates one.
fn open_container(path: &Path) -> Result<SwitchableDataset> {
    if !has_generations(path) {
        return Err(miette!("no container at {}", path.display()));
    }
    connect_container(&Location::dir(path), &StoreParams::default())
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot open container {}", path.display()))
}

/// Opens `path` as a single dataset if it holds one, otherwise as a container.
fn open_any(path: &Path) -> Result<SwitchableDataset> {
    if !is_dataset(path) {
        return open_container(path);
    }
    let dataset = StoreConnection::connect(&Location::dir(path), &StoreParams::default())
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot open {}", path.display()))?;
    Ok(SwitchableDataset::new(dataset))
}
