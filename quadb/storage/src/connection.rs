use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::StorageResult;
use crate::location::Location;
use crate::params::StoreParams;
use crate::store::StorageDataset;

static CONNECTIONS: OnceLock<DashMap<Location, Arc<StorageDataset>>> = OnceLock::new();

fn connections() -> &'static DashMap<Location, Arc<StorageDataset>> {
    CONNECTIONS.get_or_init(DashMap::new)
}

/// Process-wide registry of open datasets, at most one per location.
pub struct StoreConnection;

impl StoreConnection {
    /// Returns the dataset open at `location`, opening it with `params` if there is none.
    pub fn connect(location: &Location, params: &StoreParams) -> StorageResult<Arc<StorageDataset>> {
        match connections().entry(location.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let dataset = StorageDataset::open(location.clone(), params)?;
                debug!(%location, "connected");
                Ok(entry.insert(dataset).clone())
            }
        }
    }

    pub fn connect_existing(location: &Location) -> Option<Arc<StorageDataset>> {
        connections().get(location).map(|d| d.clone())
    }

    pub fn is_connected(location: &Location) -> bool {
        connections().contains_key(location)
    }

    /// Forgets the dataset at `location` and closes it. Returns whether one was open.
    pub fn release(location: &Location) -> bool {
        match connections().remove(location) {
            Some((_, dataset)) => {
                dataset.close();
                debug!(%location, "released");
                true
            }
            None => false,
        }
    }
}
