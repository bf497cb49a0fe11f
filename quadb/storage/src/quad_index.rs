//! Quad indexes.
//!
//! An index keeps every quad as a fixed-length record of four [`NodeId`]s, permuted
//! into the index's order (`SPOG`, `GPOS`, ...). The committed records are an immutable
//! sorted set shared by every reader. The write transaction works on its own copy, made
//! on first change, and publishes it on commit.
//!
//! On disk an index is a sequence of segments in an [`ObjectFile`], each segment a batch
//! of record changes:
//!
//! ```text
//! ┌────────────┬──────────────────────────────────────────────┐
//! │ u32 crc32  │ (u8 op, 32-byte big-endian record) × n       │
//! └────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Loading replays the segments up to the committed length.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use crc32fast::Hasher;
use parking_lot::{Mutex, RwLock};
use quadb_transaction::{ComponentError, ComponentId, TransactionalComponent, TxnId, TxnMode};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::file::ObjectFile;
use crate::location::Location;
use crate::node_table::{NodeId, decode_length};
use crate::params::{QUAD_RECORD_LENGTH, index_order};

/// Four node ids in index order.
pub type Record = [NodeId; 4];
pub type RecordSet = BTreeSet<Record>;

const OP_ADD: u8 = b'+';
const OP_DELETE: u8 = b'-';
const ENTRY_SIZE: usize = 1 + QUAD_RECORD_LENGTH;

struct IndexWriter {
    txn: TxnId,
    start: u64,
    working: Arc<RecordSet>,
    changes: Vec<(u8, Record)>,
}

pub struct QuadIndex {
    id: ComponentId,
    name: String,
    order: [usize; 4],
    file: ObjectFile,
    committed: RwLock<Arc<RecordSet>>,
    snapshots: Mutex<HashMap<TxnId, Arc<RecordSet>>>,
    writer: Mutex<Option<IndexWriter>>,
}

impl QuadIndex {
    pub fn open(location: &Location, name: &str) -> StorageResult<Self> {
        let name = name.to_ascii_uppercase();
        Ok(Self {
            id: ComponentId::from_label(format!("index-{name}")),
            order: index_order(&name)?,
            file: ObjectFile::open(location, &name)?,
            name,
            committed: RwLock::new(Arc::new(RecordSet::new())),
            snapshots: Mutex::new(HashMap::new()),
            writer: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Permutes a record in `G S P O` order into this index's order.
    pub fn to_index_order(&self, quad: &Record) -> Record {
        self.order.map(|pos| quad[pos])
    }

    /// Permutes a record in this index's order back to `G S P O`.
    pub fn to_quad_order(&self, record: &Record) -> Record {
        let mut quad = [0; 4];
        for (slot, &pos) in self.order.iter().enumerate() {
            quad[pos] = record[slot];
        }
        quad
    }

    /// Number of leading positions of a `G S P O` pattern this index can seek on.
    pub fn prefix_len(&self, pattern: &[Option<NodeId>; 4]) -> usize {
        self.order
            .iter()
            .take_while(|&&pos| pattern[pos].is_some())
            .count()
    }

    /// The records `txn` sees.
    pub fn view(&self, txn: TxnId) -> Arc<RecordSet> {
        if let Some(w) = self.writer.lock().as_ref().filter(|w| w.txn == txn) {
            return w.working.clone();
        }
        match self.snapshots.lock().get(&txn) {
            Some(snapshot) => snapshot.clone(),
            None => self.committed.read().clone(),
        }
    }

    pub fn add(&self, txn: TxnId, quad: &Record) -> StorageResult<bool> {
        self.change(txn, OP_ADD, self.to_index_order(quad))
    }

    pub fn delete(&self, txn: TxnId, quad: &Record) -> StorageResult<bool> {
        self.change(txn, OP_DELETE, self.to_index_order(quad))
    }

    fn change(&self, txn: TxnId, op: u8, record: Record) -> StorageResult<bool> {
        let mut writer = self.writer.lock();
        let writer = writer
            .as_mut()
            .filter(|w| w.txn == txn)
            .ok_or(StorageError::ReadOnly(txn))?;
        let present = writer.working.contains(&record);
        let changed = match op {
            OP_ADD if !present => Arc::make_mut(&mut writer.working).insert(record),
            OP_DELETE if present => Arc::make_mut(&mut writer.working).remove(&record),
            _ => false,
        };
        if changed {
            writer.changes.push((op, record));
        }
        Ok(changed)
    }

    /// Records in index order matching `pattern` (in `G S P O` order), using the bound
    /// prefix for the range scan.
    pub fn find(&self, txn: TxnId, pattern: &[Option<NodeId>; 4]) -> Vec<Record> {
        let view = self.view(txn);
        let prefix: Vec<NodeId> = self
            .order
            .iter()
            .map_while(|&pos| pattern[pos])
            .collect();
        let mut low = [NodeId::MIN; 4];
        let mut high = [NodeId::MAX; 4];
        low[..prefix.len()].copy_from_slice(&prefix);
        high[..prefix.len()].copy_from_slice(&prefix);
        view.range((Bound::Included(low), Bound::Included(high)))
            .filter(|record| {
                self.order
                    .iter()
                    .enumerate()
                    .all(|(slot, &pos)| pattern[pos].is_none_or(|id| record[slot] == id))
            })
            .copied()
            .collect()
    }

    /// Writes `records` (already in this index's order) as the committed content of a new
    /// index file at `target`, `batch` records per segment. The file is synced and its
    /// committed length recorded; no journal is involved.
    pub fn bulk_load<'a>(
        target: &Location,
        name: &str,
        records: impl IntoIterator<Item = &'a Record>,
        batch: usize,
    ) -> StorageResult<u64> {
        let file = ObjectFile::open(target, &name.to_ascii_uppercase())?;
        let mut chunk = Vec::with_capacity(batch);
        for record in records {
            chunk.push((OP_ADD, *record));
            if chunk.len() == batch {
                file.append(&encode_segment(&chunk))?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            file.append(&encode_segment(&chunk))?;
        }
        file.sync()?;
        let length = file.length();
        file.set_committed(length)?;
        Ok(length)
    }

    fn load(&self) -> StorageResult<()> {
        self.file.truncate_to_committed()?;
        let mut records = RecordSet::new();
        let segments = self.file.objects(self.file.committed_length())?;
        for (offset, bytes) in &segments {
            for (op, record) in decode_segment(bytes).map_err(|reason| StorageError::Corrupt {
                file: self.name.clone(),
                reason: format!("segment at {offset}: {reason}"),
            })? {
                if op == OP_ADD {
                    records.insert(record);
                } else {
                    records.remove(&record);
                }
            }
        }
        debug!(index = %self.name, segments = segments.len(), records = records.len(), "index loaded");
        *self.committed.write() = Arc::new(records);
        Ok(())
    }
}

fn encode_segment(changes: &[(u8, Record)]) -> Vec<u8> {
    let mut body = Vec::with_capacity(changes.len() * ENTRY_SIZE);
    for (op, record) in changes {
        body.push(*op);
        for id in record {
            body.extend_from_slice(&id.to_be_bytes());
        }
    }
    let mut hasher = Hasher::new();
    hasher.update(&body);
    let mut segment = Vec::with_capacity(4 + body.len());
    segment.extend_from_slice(&hasher.finalize().to_le_bytes());
    segment.extend_from_slice(&body);
    segment
}

fn decode_segment(segment: &[u8]) -> Result<Vec<(u8, Record)>, String> {
    let (checksum, body) = segment
        .split_first_chunk::<4>()
        .ok_or_else(|| "missing checksum".to_string())?;
    let mut hasher = Hasher::new();
    hasher.update(body);
    if hasher.finalize() != u32::from_le_bytes(*checksum) {
        return Err("checksum mismatch".into());
    }
    if body.len() % ENTRY_SIZE != 0 {
        return Err(format!("length {} is not a whole number of records", body.len()));
    }
    body.chunks_exact(ENTRY_SIZE)
        .map(|entry| {
            let op = entry[0];
            if op != OP_ADD && op != OP_DELETE {
                return Err(format!("unknown op {op:#04x}"));
            }
            let mut record = [0; 4];
            for (slot, bytes) in entry[1..].chunks_exact(8).enumerate() {
                let mut id = [0u8; 8];
                id.copy_from_slice(bytes);
                record[slot] = NodeId::from_be_bytes(id);
            }
            Ok((op, record))
        })
        .collect()
}

impl TransactionalComponent for QuadIndex {
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
        Ok(self.file.set_committed(decode_length(state)?)?)
    }

    fn finish_recovery(&self) -> Result<(), ComponentError> {
        Ok(self.load()?)
    }

    fn begin(&self, txn: TxnId, mode: TxnMode) -> Result<(), ComponentError> {
        let committed = self.committed.read().clone();
        match mode {
            TxnMode::Read => {
                self.snapshots.lock().insert(txn, committed);
            }
            TxnMode::Write => {
                *self.writer.lock() = Some(IndexWriter {
                    txn,
                    start: self.file.length(),
                    working: committed,
                    changes: Vec::new(),
                });
            }
        }
        Ok(())
    }

    fn commit_prepare(&self, txn: TxnId) -> Result<Option<Vec<u8>>, ComponentError> {
        let writer = self.writer.lock();
        let Some(w) = writer.as_ref().filter(|w| w.txn == txn) else {
            return Ok(None);
        };
        if w.changes.is_empty() {
            return Ok(None);
        }
        self.file.append(&encode_segment(&w.changes))?;
        self.file.sync()?;
        Ok(Some(self.file.length().to_le_bytes().to_vec()))
    }

    fn commit(&self, txn: TxnId) -> Result<(), ComponentError> {
        let writer = self.writer.lock();
        let Some(w) = writer.as_ref().filter(|w| w.txn == txn) else {
            return Ok(());
        };
        if !w.changes.is_empty() {
            self.file.set_committed(self.file.length())?;
            *self.committed.write() = w.working.clone();
        }
        Ok(())
    }

    fn commit_end(&self, _txn: TxnId) -> Result<(), ComponentError> {
        Ok(())
    }

    fn abort(&self, txn: TxnId) -> Result<(), ComponentError> {
        let mut writer = self.writer.lock();
        if let Some(w) = writer.as_mut().filter(|w| w.txn == txn) {
            self.file.truncate(w.start)?;
            w.working = self.committed.read().clone();
            w.changes.clear();
        }
        Ok(())
    }

    fn complete(&self, txn: TxnId) -> Result<(), ComponentError> {
        self.snapshots.lock().remove(&txn);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn started(location: &Location, name: &str) -> QuadIndex {
        let index = QuadIndex::open(location, name).unwrap();
        index.clean_start().unwrap();
        index
    }

    fn commit(index: &QuadIndex, txn: TxnId) {
        index.commit_prepare(txn).unwrap();
        index.commit(txn).unwrap();
        index.commit_end(txn).unwrap();
        index.complete(txn).unwrap();
    }

    #[test]
    fn test_permutation() {
        let index = started(&Location::mem(), "POSG");
        let quad = [10, 20, 30, 40];
        let record = index.to_index_order(&quad);
        assert_eq!(record, [30, 40, 20, 10]);
        assert_eq!(index.to_quad_order(&record), quad);
        assert_eq!(index.prefix_len(&[None, None, Some(30), Some(40)]), 2);
        assert_eq!(index.prefix_len(&[Some(10), None, None, None]), 0);
    }

    #[test]
    fn test_reader_keeps_snapshot() {
        let index = started(&Location::mem(), "GSPO");
        let reader = TxnId::new(1);
        index.begin(reader, TxnMode::Read).unwrap();

        let writer = TxnId::new(2);
        index.begin(writer, TxnMode::Write).unwrap();
        assert!(index.add(writer, &[1, 2, 3, 4]).unwrap());
        assert!(!index.add(writer, &[1, 2, 3, 4]).unwrap());
        commit(&index, writer);

        assert!(index.view(reader).is_empty());
        index.complete(reader).unwrap();
        assert_eq!(index.view(TxnId::new(3)).len(), 1);
    }

    #[test]
    fn test_find_uses_prefix_and_filters_rest() {
        let index = started(&Location::mem(), "SPOG");
        let txn = TxnId::new(1);
        index.begin(txn, TxnMode::Write).unwrap();
        for quad in [[1, 10, 20, 30], [2, 10, 21, 30], [1, 11, 20, 30], [1, 10, 20, 31]] {
            index.add(txn, &quad).unwrap();
        }
        let by_subject = index.find(txn, &[None, Some(10), None, None]);
        assert_eq!(by_subject.len(), 3);
        let by_subject_object = index.find(txn, &[None, Some(10), None, Some(30)]);
        assert_eq!(by_subject_object.len(), 2);
        let all = index.find(txn, &[None; 4]);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_abort_restores_committed() {
        let location = Location::mem();
        let index = started(&location, "GSPO");
        let txn = TxnId::new(1);
        index.begin(txn, TxnMode::Write).unwrap();
        index.add(txn, &[1, 2, 3, 4]).unwrap();
        index.abort(txn).unwrap();
        index.complete(txn).unwrap();
        assert!(index.view(TxnId::new(2)).is_empty());
        assert_eq!(index.file.length(), 0);
    }

    #[test]
    fn test_segments_replay_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let location = Location::dir(dir.path());
        {
            let index = started(&location, "GSPO");
            let t1 = TxnId::new(1);
            index.begin(t1, TxnMode::Write).unwrap();
            index.add(t1, &[1, 2, 3, 4]).unwrap();
            index.add(t1, &[5, 6, 7, 8]).unwrap();
            commit(&index, t1);

            let t2 = TxnId::new(2);
            index.begin(t2, TxnMode::Write).unwrap();
            index.delete(t2, &[1, 2, 3, 4]).unwrap();
            commit(&index, t2);
        }
        let index = started(&location, "GSPO");
        let view = index.view(TxnId::new(3));
        assert_eq!(view.iter().copied().collect::<Vec<_>>(), vec![[5, 6, 7, 8]]);
    }

    #[test]
    fn test_bulk_load() {
        let dir = tempfile::tempdir().unwrap();
        let location = Location::dir(dir.path());
        let records: RecordSet = (0..10u64).map(|i| [i, i + 1, i + 2, i + 3]).collect();
        QuadIndex::bulk_load(&location, "GSPO", &records, 3).unwrap();

        let index = started(&location, "GSPO");
        assert_eq!(*index.view(TxnId::new(1)), records);
        assert_eq!(index.file.objects(index.file.length()).unwrap().len(), 4);
    }

    #[test]
    fn test_corrupt_segment_detected() {
        let changes = vec![(OP_ADD, [1, 2, 3, 4])];
        let mut segment = encode_segment(&changes);
        assert_eq!(decode_segment(&segment).unwrap(), changes);
        let last = segment.len() - 1;
        segment[last] ^= 1;
        assert!(decode_segment(&segment).is_err());
    }
}
