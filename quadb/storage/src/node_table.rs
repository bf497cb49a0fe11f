//! Dictionary of RDF terms.
//!
//! Every term stored in a quad is written once to an [`ObjectFile`] and referred to by
//! the offset of that object, its [`NodeId`]. The term-to-id map is kept in memory and
//! rebuilt from the file when the table starts.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use quadb_common::Term;
use quadb_transaction::{ComponentError, ComponentId, TransactionalComponent, TxnId, TxnMode};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::file::ObjectFile;
use crate::location::Location;

pub type NodeId = u64;

pub const NODE_TABLE_NAME: &str = "nodes";

struct NodeWriter {
    txn: TxnId,
    start: u64,
    allocated: HashMap<Term, NodeId>,
}

pub struct NodeTable {
    id: ComponentId,
    file: ObjectFile,
    committed: RwLock<HashMap<Term, NodeId>>,
    writer: Mutex<Option<NodeWriter>>,
    cache: Mutex<LruCache<NodeId, Term>>,
}

impl NodeTable {
    pub fn open(location: &Location, cache_size: usize) -> StorageResult<Self> {
        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            id: ComponentId::from_label(NODE_TABLE_NAME),
            file: ObjectFile::open(location, NODE_TABLE_NAME)?,
            committed: RwLock::new(HashMap::new()),
            writer: Mutex::new(None),
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    pub fn file(&self) -> &ObjectFile {
        &self.file
    }

    /// Number of committed nodes.
    pub fn len(&self) -> usize {
        self.committed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of `term` as seen by `txn`, if the term has been stored.
    pub fn node_id(&self, txn: TxnId, term: &Term) -> Option<NodeId> {
        if let Some(id) = self.committed.read().get(term) {
            return Some(*id);
        }
        self.writer
            .lock()
            .as_ref()
            .filter(|w| w.txn == txn)
            .and_then(|w| w.allocated.get(term).copied())
    }

    /// Id of `term`, storing it first if needed. Only the write transaction may call this.
    pub fn get_or_alloc(&self, txn: TxnId, term: &Term) -> StorageResult<NodeId> {
        if let Some(id) = self.committed.read().get(term) {
            return Ok(*id);
        }
        let mut writer = self.writer.lock();
        let writer = writer
            .as_mut()
            .filter(|w| w.txn == txn)
            .ok_or(StorageError::ReadOnly(txn))?;
        if let Some(id) = writer.allocated.get(term) {
            return Ok(*id);
        }
        let bytes = postcard::to_allocvec(term)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        let id = self.file.append(&bytes)?;
        writer.allocated.insert(term.clone(), id);
        Ok(id)
    }

    pub fn term(&self, id: NodeId) -> StorageResult<Term> {
        if let Some(term) = self.cache.lock().get(&id) {
            return Ok(term.clone());
        }
        let bytes = self.file.read(id).map_err(|_| StorageError::NodeNotFound(id))?;
        let term: Term = postcard::from_bytes(&bytes)
            .map_err(|e| StorageError::DeserializationFailed(e.to_string()))?;
        self.cache.lock().put(id, term.clone());
        Ok(term)
    }

    /// Copies the committed table to `target`.
    pub fn copy_committed(&self, target: &Location) -> StorageResult<()> {
        self.file.copy_raw(self.file.committed_length(), target)
    }

    fn load(&self) -> StorageResult<()> {
        self.file.truncate_to_committed()?;
        let mut map = HashMap::new();
        for (offset, bytes) in self.file.objects(self.file.committed_length())? {
            let term: Term = postcard::from_bytes(&bytes)
                .map_err(|e| StorageError::DeserializationFailed(e.to_string()))?;
            map.insert(term, offset);
        }
        debug!(nodes = map.len(), "node table loaded");
        *self.committed.write() = map;
        self.cache.lock().clear();
        Ok(())
    }

    fn with_writer<T>(
        &self,
        txn: TxnId,
        f: impl FnOnce(&mut NodeWriter) -> StorageResult<T>,
    ) -> Result<Option<T>, ComponentError> {
        let mut writer = self.writer.lock();
        match writer.as_mut() {
            Some(w) if w.txn == txn => Ok(Some(f(w)?)),
            _ => Ok(None),
        }
    }
}

impl TransactionalComponent for NodeTable {
    fn component_id(&self) -> &ComponentId {
        &self.id
    }

    fn clean_start(&self) -> Result<(), ComponentError> {
        Ok(self.load()?)
    }

    fn start_recovery(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    fn recover(&self, state: &[u8]) -> Result<(), ComponentError> {
        let length = decode_length(state)?;
        Ok(self.file.set_committed(length)?)
    }

    fn finish_recovery(&self) -> Result<(), ComponentError> {
        Ok(self.load()?)
    }

    fn begin(&self, txn: TxnId, mode: TxnMode) -> Result<(), ComponentError> {
        if mode == TxnMode::Write {
            *self.writer.lock() = Some(NodeWriter {
                txn,
                start: self.file.length(),
                allocated: HashMap::new(),
            });
        }
        Ok(())
    }

    fn commit_prepare(&self, txn: TxnId) -> Result<Option<Vec<u8>>, ComponentError> {
        let allocated = self.with_writer(txn, |w| Ok(!w.allocated.is_empty()))?;
        if allocated != Some(true) {
            return Ok(None);
        }
        self.file.sync()?;
        Ok(Some(self.file.length().to_le_bytes().to_vec()))
    }

    fn commit(&self, txn: TxnId) -> Result<(), ComponentError> {
        self.with_writer(txn, |w| {
            if w.allocated.is_empty() {
                return Ok(());
            }
            self.file.set_committed(self.file.length())?;
            self.committed.write().extend(w.allocated.drain());
            Ok(())
        })?;
        Ok(())
    }

    fn commit_end(&self, _txn: TxnId) -> Result<(), ComponentError> {
        Ok(())
    }

    fn abort(&self, txn: TxnId) -> Result<(), ComponentError> {
        self.with_writer(txn, |w| {
            if !w.allocated.is_empty() {
                let mut cache = self.cache.lock();
                for id in w.allocated.values() {
                    cache.pop(id);
                }
                w.allocated.clear();
            }
            self.file.truncate(w.start)
        })?;
        Ok(())
    }

    fn complete(&self, txn: TxnId) -> Result<(), ComponentError> {
        let mut writer = self.writer.lock();
        if writer.as_ref().is_some_and(|w| w.txn == txn) {
            *writer = None;
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ComponentError> {
        Ok(self.file.sync()?)
    }
}

pub(crate) fn decode_length(state: &[u8]) -> Result<u64, ComponentError> {
    let bytes: [u8; 8] = state
        .try_into()
        .map_err(|_| format!("bad prepare state of {} bytes", state.len()))?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(location: &Location) -> NodeTable {
        let table = NodeTable::open(location, 16).unwrap();
        table.clean_start().unwrap();
        table
    }

    fn write_txn(table: &NodeTable, raw: u64, terms: &[Term], commit: bool) -> Vec<NodeId> {
        let txn = TxnId::new(raw);
        table.begin(txn, TxnMode::Write).unwrap();
        let ids = terms
            .iter()
            .map(|t| table.get_or_alloc(txn, t).unwrap())
            .collect();
        if commit {
            table.commit_prepare(txn).unwrap();
            table.commit(txn).unwrap();
            table.commit_end(txn).unwrap();
        } else {
            table.abort(txn).unwrap();
        }
        table.complete(txn).unwrap();
        ids
    }

    #[test]
    fn test_alloc_is_idempotent() {
        let table = started(&Location::mem());
        let txn = TxnId::new(1);
        table.begin(txn, TxnMode::Write).unwrap();
        let a = table.get_or_alloc(txn, &Term::iri("http://x/a")).unwrap();
        let again = table.get_or_alloc(txn, &Term::iri("http://x/a")).unwrap();
        let b = table.get_or_alloc(txn, &Term::literal("a")).unwrap();
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(table.term(b).unwrap(), Term::literal("a"));
    }

    #[test]
    fn test_read_transaction_cannot_allocate() {
        let table = started(&Location::mem());
        let txn = TxnId::new(1);
        table.begin(txn, TxnMode::Read).unwrap();
        assert!(matches!(
            table.get_or_alloc(txn, &Term::iri("x")),
            Err(StorageError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_abort_discards_nodes() {
        let table = started(&Location::mem());
        let ids = write_txn(&table, 1, &[Term::iri("x")], false);
        assert!(table.node_id(TxnId::new(2), &Term::iri("x")).is_none());
        assert!(table.term(ids[0]).is_err());
        assert!(table.is_empty());

        // The space is reused by the next writer.
        let again = write_txn(&table, 3, &[Term::iri("y")], true);
        assert_eq!(again[0], ids[0]);
        assert_eq!(table.term(again[0]).unwrap(), Term::iri("y"));
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let location = Location::dir(dir.path());
        let ids = {
            let table = started(&location);
            write_txn(&table, 1, &[Term::iri("a"), Term::blank("b")], true)
        };
        let table = started(&location);
        assert_eq!(table.len(), 2);
        assert_eq!(table.node_id(TxnId::new(9), &Term::blank("b")), Some(ids[1]));
    }

    #[test]
    fn test_recover_moves_committed_length() {
        let dir = tempfile::tempdir().unwrap();
        let location = Location::dir(dir.path());
        let state = {
            let table = started(&location);
            let txn = TxnId::new(1);
            table.begin(txn, TxnMode::Write).unwrap();
            table.get_or_alloc(txn, &Term::iri("a")).unwrap();
            // Crash after prepare, before commit.
            table.commit_prepare(txn).unwrap().unwrap()
        };

        let table = NodeTable::open(&location, 16).unwrap();
        table.start_recovery().unwrap();
        table.recover(&state).unwrap();
        table.recover(&state).unwrap();
        table.finish_recovery().unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.node_id(TxnId::new(2), &Term::iri("a")).is_some());
    }
}
