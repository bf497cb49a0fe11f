//! Quad storage on top of the transaction coordinator.
//!
//! A [`StorageDataset`] is a node table and a set of quad indexes committed together by
//! one [`TransactionCoordinator`](quadb_transaction::TransactionCoordinator). Datasets are
//! normally used through a [`SwitchableDataset`], which lets them be cloned, repacked and
//! switched while in use.

pub mod changes;
pub mod connection;
pub mod copy;
pub mod dataset;
pub mod error;
pub mod file;
pub mod location;
pub mod node_table;
pub mod ops;
pub mod params;
pub mod quad_index;
pub mod rebuild;
pub mod repack;
pub mod store;
pub mod switchable;

pub use changes::{
    ChangeAction, ChangeLogReader, ChangeLogWriter, ChangeRecord, RecordingDataset, ReplayStats,
    replay,
};
pub use connection::StoreConnection;
pub use copy::{check_clone_target, clone_logical, clone_logical_at, copy_quads};
pub use dataset::Dataset;
pub use error::{ChangeLogError, CloneError, StorageError, StorageResult};
pub use location::Location;
pub use ops::{CompactOptions, backup, compact, connect_container};
pub use params::StoreParams;
pub use rebuild::{clone_structural, clone_structural_at};
pub use repack::{CloneStrategy, RepackOptions, repack};
pub use store::StorageDataset;
pub use switchable::{ActiveDataset, SwitchableDataset};
