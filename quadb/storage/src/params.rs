//! Physical layout parameters of a dataset.
//!
//! Parameters are fixed when a dataset is created and saved next to its files as
//! `store-params.json`. Reopening a dataset uses the saved values, so a clone made with
//! the source's parameters keeps its layout.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::location::Location;

pub const PARAMS_FILE: &str = "store-params.json";
pub const DEFAULT_BLOCK_SIZE: usize = 8192;
pub const DEFAULT_NODE_CACHE_SIZE: usize = 10_000;
/// Four node ids of eight bytes each.
pub const QUAD_RECORD_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreParams {
    /// Bytes per block. Bulk loads write one block worth of records per batch.
    pub block_size: usize,
    /// Number of decoded terms kept in the node table cache.
    pub node_cache_size: usize,
    pub record_key_length: usize,
    pub record_value_length: usize,
    /// Quad index orders, each a permutation of `GSPO`.
    pub quad_indexes: Vec<String>,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            node_cache_size: DEFAULT_NODE_CACHE_SIZE,
            record_key_length: QUAD_RECORD_LENGTH,
            record_value_length: 0,
            quad_indexes: ["GSPO", "GPOS", "GOSP", "SPOG", "POSG", "OSPG"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl StoreParams {
    pub fn validate(&self) -> StorageResult<()> {
        if self.record_key_length != QUAD_RECORD_LENGTH || self.record_value_length != 0 {
            return Err(StorageError::InvalidParams(format!(
                "record layout {}/{} is not supported, expected {QUAD_RECORD_LENGTH}/0",
                self.record_key_length, self.record_value_length
            )));
        }
        if self.block_size < QUAD_RECORD_LENGTH {
            return Err(StorageError::InvalidParams(format!(
                "block size {} is smaller than one record",
                self.block_size
            )));
        }
        if self.quad_indexes.is_empty() {
            return Err(StorageError::InvalidParams("no quad indexes".into()));
        }
        for (i, name) in self.quad_indexes.iter().enumerate() {
            index_order(name)?;
            if self.quad_indexes[..i].contains(name) {
                return Err(StorageError::InvalidParams(format!(
                    "index {name} listed twice"
                )));
            }
        }
        Ok(())
    }

    /// Records written per batch during a bulk load.
    pub fn records_per_block(&self) -> usize {
        (self.block_size / self.record_key_length).max(1)
    }

    /// Returns the parameters saved at `location`, or saves and returns `self` if there
    /// are none.
    pub fn load_or_init(&self, location: &Location) -> StorageResult<StoreParams> {
        let Some(path) = location.file(PARAMS_FILE) else {
            self.validate()?;
            return Ok(self.clone());
        };
        let params = if path.exists() {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json)
                .map_err(|e| StorageError::DeserializationFailed(e.to_string()))?
        } else {
            self.save(location)?;
            self.clone()
        };
        params.validate()?;
        Ok(params)
    }

    pub fn save(&self, location: &Location) -> StorageResult<()> {
        if let Some(path) = location.file(PARAMS_FILE) {
            let json = serde_json::to_string_pretty(self)
                .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
            fs::write(path, json)?;
        }
        Ok(())
    }
}

/// Maps an index name to the quad positions (G=0, S=1, P=2, O=3) of its record slots.
pub fn index_order(name: &str) -> StorageResult<[usize; 4]> {
    let bytes = name.as_bytes();
    if bytes.len() != 4 {
        return Err(StorageError::InvalidParams(format!("bad index name {name}")));
    }
    let mut order = [0usize; 4];
    for (slot, b) in bytes.iter().enumerate() {
        order[slot] = match b.to_ascii_uppercase() {
            b'G' => 0,
            b'S' => 1,
            b'P' => 2,
            b'O' => 3,
            _ => return Err(StorageError::InvalidParams(format!("bad index name {name}"))),
        };
    }
    let mut seen = [false; 4];
    for &pos in &order {
        if std::mem::replace(&mut seen[pos], true) {
            return Err(StorageError::InvalidParams(format!("bad index name {name}")));
        }
    }
    Ok(order)
}
