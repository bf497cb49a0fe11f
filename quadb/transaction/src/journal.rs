// journal.rs
// Append-only commit journal shared by every component of a coordinator.
//
// Entry layout (little-endian):
// ┌────────────┬────────────┬───────────┐
// │ u32 len    │ u32 crc32  │ payload…  │
// └────────────┴────────────┴───────────┘
// - `len`    : number of bytes in payload
// - `crc32`  : checksum of payload for corruption detection
// - payload  : postcard-encoded `JournalEntry`
//
// A write transaction is journaled as one `Prepare` entry per component that
// returned a blob, followed by a `Commit` marker. Everything is written with a
// single write call and fsynced before any component commits.
//
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::component_id::ComponentId;
use crate::error::{JournalError, JournalResult};
use crate::txn_id::TxnId;

const HEADER_SIZE: usize = 8; // 4 bytes length + 4 bytes crc32

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    Prepare {
        txn: TxnId,
        component: ComponentId,
        state: Vec<u8>,
    },
    Commit {
        txn: TxnId,
    },
    Abort {
        txn: TxnId,
    },
}

impl JournalEntry {
    pub fn txn(&self) -> TxnId {
        match self {
            Self::Prepare { txn, .. } | Self::Commit { txn } | Self::Abort { txn } => *txn,
        }
    }

    fn to_bytes(&self) -> JournalResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| JournalError::SerializationFailed(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> JournalResult<Self> {
        postcard::from_bytes(bytes).map_err(|e| JournalError::DeserializationFailed(e.to_string()))
    }
}

/// The prepare states of one committed transaction, in journal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTxn {
    pub txn: TxnId,
    pub states: Vec<(ComponentId, Vec<u8>)>,
}

enum Backing {
    File {
        file: BufWriter<File>,
        path: PathBuf,
    },
    Memory(Vec<u8>),
}

pub struct Journal {
    backing: Backing,
}

impl Journal {
    /// Open an existing journal or create a new one at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> JournalResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .read(true)
            .open(&path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            backing: Backing::File {
                file: BufWriter::new(file),
                path: path.as_ref().to_path_buf(),
            },
        })
    }

    /// A journal for in-memory datasets. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(Vec::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File { path, .. } => Some(path),
            Backing::Memory(_) => None,
        }
    }

    /// Appends the prepare states of `txn` followed by its commit marker and syncs.
    ///
    /// On return the transaction is durable. If the write fails the journal is truncated
    /// back to where it was, so a failed commit leaves no partial group behind.
    pub fn append_commit(
        &mut self,
        txn: TxnId,
        states: &[(ComponentId, Vec<u8>)],
    ) -> JournalResult<()> {
        let mut data = Vec::new();
        for (component, state) in states {
            let entry = JournalEntry::Prepare {
                txn,
                component: component.clone(),
                state: state.clone(),
            };
            encode_into(&entry, &mut data)?;
        }
        encode_into(&JournalEntry::Commit { txn }, &mut data)?;
        self.write_all(&data)?;
        self.sync()
    }

    /// Appends one entry. Call [`Self::sync`] to make it durable.
    pub fn append(&mut self, entry: &JournalEntry) -> JournalResult<()> {
        let mut data = Vec::new();
        encode_into(entry, &mut data)?;
        self.write_all(&data)
    }

    fn write_all(&mut self, data: &[u8]) -> JournalResult<()> {
        match &mut self.backing {
            Backing::Memory(bytes) => {
                bytes.extend_from_slice(data);
                Ok(())
            }
            Backing::File { file, .. } => {
                let original_pos = file.stream_position()?;
                match file.write_all(data).and_then(|_| file.flush()) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        file.seek(SeekFrom::Start(original_pos))?;
                        file.get_ref().set_len(original_pos)?;
                        Err(JournalError::Io(e))
                    }
                }
            }
        }
    }

    /// Flush internal buffer and fsync to guarantee durability.
    pub fn sync(&mut self) -> JournalResult<()> {
        if let Backing::File { file, .. } = &mut self.backing {
            file.flush()?;
            file.get_ref().sync_data()?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> JournalResult<bool> {
        match &self.backing {
            Backing::Memory(bytes) => Ok(bytes.is_empty()),
            Backing::File { file, .. } => Ok(file.get_ref().metadata()?.len() == 0),
        }
    }

    /// Reads every entry from the start of the journal.
    ///
    /// Any checksum mismatch, short record or undecodable payload is an error: the
    /// journal is never read past a damaged entry.
    pub fn entries(&self) -> JournalResult<Vec<JournalEntry>> {
        match &self.backing {
            Backing::Memory(bytes) => decode_all(bytes),
            Backing::File { path, .. } => {
                let mut bytes = Vec::new();
                File::open(path)?.read_to_end(&mut bytes)?;
                decode_all(&bytes)
            }
        }
    }

    /// Groups the journal into transactions that reached their commit marker.
    ///
    /// Groups closed by an `Abort` marker, or never closed, are dropped.
    pub fn committed(&self) -> JournalResult<Vec<CommittedTxn>> {
        let mut committed = Vec::new();
        let mut pending: Vec<(TxnId, ComponentId, Vec<u8>)> = Vec::new();
        for entry in self.entries()? {
            match entry {
                JournalEntry::Prepare {
                    txn,
                    component,
                    state,
                } => pending.push((txn, component, state)),
                JournalEntry::Commit { txn } => {
                    let (group, rest): (Vec<_>, Vec<_>) =
                        pending.into_iter().partition(|(t, ..)| *t == txn);
                    pending = rest;
                    committed.push(CommittedTxn {
                        txn,
                        states: group
                            .into_iter()
                            .map(|(_, component, state)| (component, state))
                            .collect(),
                    });
                }
                JournalEntry::Abort { txn } => pending.retain(|(t, ..)| *t != txn),
            }
        }
        Ok(committed)
    }

    /// Discards every entry.
    pub fn reset(&mut self) -> JournalResult<()> {
        match &mut self.backing {
            Backing::Memory(bytes) => bytes.clear(),
            Backing::File { file, .. } => {
                file.flush()?;
                file.get_ref().set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                file.get_ref().sync_data()?;
            }
        }
        Ok(())
    }
}

fn encode_into(entry: &JournalEntry, data: &mut Vec<u8>) -> JournalResult<()> {
    let payload = entry.to_bytes()?;
    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let checksum = hasher.finalize();
    data.reserve(HEADER_SIZE + payload.len());
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&checksum.to_le_bytes());
    data.extend_from_slice(&payload);
    Ok(())
}

fn decode_all(bytes: &[u8]) -> JournalResult<Vec<JournalEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let offset = pos as u64;
        let Some(header) = bytes.get(pos..pos + HEADER_SIZE) else {
            return Err(JournalError::Truncated { offset });
        };
        let (len, checksum) = header.split_at(4);
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        let checksum = u32::from_le_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
        pos += HEADER_SIZE;

        let Some(payload) = bytes.get(pos..pos + len) else {
            return Err(JournalError::Truncated { offset });
        };
        let mut hasher = Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != checksum {
            return Err(JournalError::ChecksumMismatch { offset });
        }
        entries.push(JournalEntry::from_bytes(payload)?);
        pos += len;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn states(labels: &[&str]) -> Vec<(ComponentId, Vec<u8>)> {
        labels
            .iter()
            .map(|l| (ComponentId::from_label(*l), l.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_append_commit_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jrnl");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal
                .append_commit(TxnId::new(1), &states(&["a", "b"]))
                .unwrap();
        }

        let journal = Journal::open(&path).unwrap();
        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[2], JournalEntry::Commit { txn } if txn == TxnId::new(1)));

        let committed = journal.committed().unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].states, states(&["a", "b"]));
    }

    #[test]
    fn test_uncommitted_and_aborted_groups_are_dropped() {
        let mut journal = Journal::in_memory();
        let a = ComponentId::from_label("a");
        journal
            .append(&JournalEntry::Prepare {
                txn: TxnId::new(1),
                component: a.clone(),
                state: vec![1],
            })
            .unwrap();
        journal
            .append(&JournalEntry::Abort { txn: TxnId::new(1) })
            .unwrap();
        journal
            .append_commit(TxnId::new(2), &[(a.clone(), vec![2])])
            .unwrap();
        journal
            .append(&JournalEntry::Prepare {
                txn: TxnId::new(3),
                component: a.clone(),
                state: vec![3],
            })
            .unwrap();

        let committed = journal.committed().unwrap();
        assert_eq!(committed, vec![CommittedTxn {
            txn: TxnId::new(2),
            states: vec![(a, vec![2])],
        }]);
    }

    #[test]
    fn test_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jrnl");
        let mut journal = Journal::open(&path).unwrap();
        journal
            .append_commit(TxnId::new(1), &states(&["a"]))
            .unwrap();
        assert!(!journal.is_empty().unwrap());

        journal.reset().unwrap();
        assert!(journal.is_empty().unwrap());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        // Appends after a reset start from the beginning of the file.
        journal
            .append_commit(TxnId::new(2), &states(&["b"]))
            .unwrap();
        let committed = journal.committed().unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].txn, TxnId::new(2));
    }

    #[test]
    fn test_checksum_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jrnl");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal
                .append_commit(TxnId::new(1), &states(&["a"]))
                .unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[HEADER_SIZE + 2] ^= 0xff;
        bytes[last] ^= 0x01;
        fs::write(&path, &bytes).unwrap();

        let journal = Journal::open(&path).unwrap();
        assert!(matches!(
            journal.entries(),
            Err(JournalError::ChecksumMismatch { offset: 0 })
        ));
    }

    #[test]
    fn test_truncated_entry_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jrnl");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal
                .append_commit(TxnId::new(1), &states(&["a"]))
                .unwrap();
        }
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let journal = Journal::open(&path).unwrap();
        assert!(matches!(
            journal.entries(),
            Err(JournalError::Truncated { .. })
        ));
    }
}
