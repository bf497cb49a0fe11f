use std::fmt;
use std::sync::Arc;

use quadb_common::{Quad, QuadPattern, Term};
use quadb_transaction::{
    Journal, Transaction, TransactionCoordinator, TransactionResult, Transactional, TxnMode,
    TxnState,
};
use tracing::info;

use crate::dataset::Dataset;
use crate::error::{StorageError, StorageResult};
use crate::location::Location;
use crate::node_table::{NodeId, NodeTable};
use crate::params::StoreParams;
use crate::quad_index::QuadIndex;

pub const JOURNAL_FILE: &str = "journal.jrnl";

/// A dataset stored at one [`Location`]: a node table, a set of quad indexes and the
/// coordinator that commits them together.
pub struct StorageDataset {
    location: Location,
    params: StoreParams,
    coordinator: Arc<TransactionCoordinator>,
    nodes: Arc<NodeTable>,
    indexes: Vec<Arc<QuadIndex>>,
}

impl StorageDataset {
    /// Opens the dataset at `location`, creating it if needed, and runs recovery.
    ///
    /// Parameters saved at the location take precedence over `params`. The node table is
    /// registered with the coordinator before the indexes, so on commit nodes are durable
    /// before any index record refers to them.
    ///
    /// Most callers should go through [`StoreConnection`](crate::StoreConnection), which
    /// keeps one open dataset per location.
    pub fn open(location: Location, params: &StoreParams) -> StorageResult<Arc<Self>> {
        if let Some(dir) = location.path() {
            std::fs::create_dir_all(dir)?;
        }
        let params = params.load_or_init(&location)?;
        let journal = match location.file(JOURNAL_FILE) {
            Some(path) => Journal::open(path).map_err(quadb_transaction::TransactionError::from)?,
            None => Journal::in_memory(),
        };
        let coordinator = TransactionCoordinator::new(journal);

        let nodes = Arc::new(NodeTable::open(&location, params.node_cache_size)?);
        coordinator.add_component(nodes.clone())?;
        let mut indexes = Vec::with_capacity(params.quad_indexes.len());
        for name in &params.quad_indexes {
            let index = Arc::new(QuadIndex::open(&location, name)?);
            coordinator.add_component(index.clone())?;
            indexes.push(index);
        }
        coordinator.start()?;
        info!(%location, indexes = indexes.len(), "dataset opened");

        Ok(Arc::new(Self {
            location,
            params,
            coordinator,
            nodes,
            indexes,
        }))
    }

    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    pub fn node_table(&self) -> &Arc<NodeTable> {
        &self.nodes
    }

    pub fn indexes(&self) -> &[Arc<QuadIndex>] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&Arc<QuadIndex>> {
        self.indexes
            .iter()
            .find(|i| i.name().eq_ignore_ascii_case(name))
    }

    /// Shuts the coordinator down. Further transactions are refused.
    pub fn close(&self) {
        self.coordinator.retire();
        self.coordinator.shutdown();
        info!(location = %self.location, "dataset closed");
    }

    /// Calls `f` with every quad `txn` sees, decoding one record at a time from the
    /// first index's snapshot. Returns the number of quads visited.
    pub fn for_each_quad(
        &self,
        txn: &Transaction,
        mut f: impl FnMut(Quad) -> StorageResult<()>,
    ) -> StorageResult<usize> {
        self.check_txn(txn)?;
        let index = &self.indexes[0];
        let snapshot = index.view(txn.id());
        for record in snapshot.iter() {
            f(self.decode(&index.to_quad_order(record))?)?;
        }
        Ok(snapshot.len())
    }

    fn check_txn(&self, txn: &Transaction) -> StorageResult<()> {
        if !Arc::ptr_eq(txn.coordinator(), &self.coordinator) {
            return Err(StorageError::WrongDataset(txn.id()));
        }
        let state = txn.state();
        if state != TxnState::Active {
            return Err(quadb_transaction::TransactionError::InvalidState {
                txn: txn.id(),
                state,
            }
            .into());
        }
        Ok(())
    }

    fn check_write(&self, txn: &Transaction) -> StorageResult<()> {
        self.check_txn(txn)?;
        if !txn.is_write() {
            return Err(StorageError::ReadOnly(txn.id()));
        }
        Ok(())
    }

    fn quad_ids(&self, txn: &Transaction, quad: &Quad) -> Option<[NodeId; 4]> {
        let [g, s, p, o] = quad.terms();
        Some([
            self.nodes.node_id(txn.id(), g)?,
            self.nodes.node_id(txn.id(), s)?,
            self.nodes.node_id(txn.id(), p)?,
            self.nodes.node_id(txn.id(), o)?,
        ])
    }

    /// The index with the longest bound prefix for `pattern`.
    fn choose_index(&self, pattern: &[Option<NodeId>; 4]) -> &Arc<QuadIndex> {
        let mut best = &self.indexes[0];
        let mut best_len = best.prefix_len(pattern);
        for index in &self.indexes[1..] {
            let len = index.prefix_len(pattern);
            if len > best_len {
                best = index;
                best_len = len;
            }
        }
        best
    }

    fn decode(&self, ids: &[NodeId; 4]) -> StorageResult<Quad> {
        let terms: [Term; 4] = [
            self.nodes.term(ids[0])?,
            self.nodes.term(ids[1])?,
            self.nodes.term(ids[2])?,
            self.nodes.term(ids[3])?,
        ];
        Ok(Quad::from_terms(terms))
    }
}

impl fmt::Debug for StorageDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageDataset")
            .field("location", &self.location)
            .field("indexes", &self.params.quad_indexes)
            .finish()
    }
}

impl Transactional for StorageDataset {
    fn begin(&self, mode: TxnMode) -> TransactionResult<Transaction> {
        self.coordinator.begin(mode)
    }
}

impl Dataset for StorageDataset {
    fn location(&self) -> Location {
        self.location.clone()
    }

    fn coordinator(&self) -> Arc<TransactionCoordinator> {
        self.coordinator.clone()
    }

    fn add(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool> {
        self.check_write(txn)?;
        let mut ids = [0; 4];
        for (id, term) in ids.iter_mut().zip(quad.terms()) {
            *id = self.nodes.get_or_alloc(txn.id(), term)?;
        }
        let mut changed = false;
        for index in &self.indexes {
            changed |= index.add(txn.id(), &ids)?;
        }
        Ok(changed)
    }

    fn delete(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool> {
        self.check_write(txn)?;
        let Some(ids) = self.quad_ids(txn, quad) else {
            return Ok(false);
        };
        let mut changed = false;
        for index in &self.indexes {
            changed |= index.delete(txn.id(), &ids)?;
        }
        Ok(changed)
    }

    fn contains(&self, txn: &Transaction, quad: &Quad) -> StorageResult<bool> {
        self.check_txn(txn)?;
        let Some(ids) = self.quad_ids(txn, quad) else {
            return Ok(false);
        };
        let index = &self.indexes[0];
        Ok(index.view(txn.id()).contains(&index.to_index_order(&ids)))
    }

    fn find(&self, txn: &Transaction, pattern: &QuadPattern) -> StorageResult<Vec<Quad>> {
        self.check_txn(txn)?;
        let mut ids = [None; 4];
        for (id, term) in ids.iter_mut().zip(pattern.terms()) {
            if let Some(term) = term {
                match self.nodes.node_id(txn.id(), term) {
                    Some(node) => *id = Some(node),
                    // A term never stored matches nothing.
                    None => return Ok(Vec::new()),
                }
            }
        }
        let index = self.choose_index(&ids);
        index
            .find(txn.id(), &ids)
            .iter()
            .map(|record| self.decode(&index.to_quad_order(record)))
            .collect()
    }

    fn len(&self, txn: &Transaction) -> StorageResult<usize> {
        self.check_txn(txn)?;
        Ok(self.indexes[0].view(txn.id()).len())
    }
}
