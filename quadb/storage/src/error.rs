use std::io;
use std::path::PathBuf;

use quadb_transaction::{TransactionError, TxnId};
use thiserror::Error;

use crate::location::Location;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Change log error: {0}")]
    ChangeLog(#[from] ChangeLogError),
    #[error("Clone error: {0}")]
    Clone(#[from] CloneError),
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("invalid store parameters: {0}")]
    InvalidParams(String),
    #[error("corrupt {file}: {reason}")]
    Corrupt { file: String, reason: String },
    #[error("transaction {0} is read-only")]
    ReadOnly(TxnId),
    #[error("transaction {0} does not belong to this dataset")]
    WrongDataset(TxnId),
    #[error("node {0} not found")]
    NodeNotFound(u64),
    #[error("{0} is not a container")]
    NotAContainer(Location),
    #[error("dataset was switched concurrently")]
    SwitchConflict,
}

#[derive(Error, Debug)]
pub enum ChangeLogError {
    #[error("unknown change tag {0:#04x}")]
    UnknownTag(u8),
    #[error("change log ended without an END record")]
    MissingEnd,
    #[error("bad term encoding: {0}")]
    BadTerm(String),
    #[error("change log writer already finished")]
    Finished,
}

/// Refusals raised before a clone touches its target.
#[derive(Error, Debug)]
pub enum CloneError {
    #[error("clone target {0} is the source location")]
    SameLocation(Location),
    #[error("clone target {} is not empty", .0.display())]
    NotEmpty(PathBuf),
    #[error("clone target {0} is in use")]
    InUse(Location),
    #[error("structural clone requires on-disk locations, got {0}")]
    NotDurable(Location),
}
