// changes
// A change log is a stream of quad changes closed by an END tag.
//
// Record layout:
// ┌────────┬────────────┬────────────┬────────────┬────────────┐
// │ u8 tag │ graph      │ subject    │ predicate  │ object     │
// └────────┴────────────┴────────────┴────────────┴────────────┘
// Each term is a u32 little-endian length followed by the postcard encoding of the
// `Term`. The END record is the tag alone.
//
mod recording;

use std::io::{self, Read, Write};

pub use recording::RecordingDataset;

use quadb_common::{Quad, Term};
use quadb_transaction::execute_write;
use tracing::info;

use crate::dataset::Dataset;
use crate::error::{ChangeLogError, StorageError, StorageResult};

pub const TAG_ADD: u8 = b'A';
pub const TAG_DELETE: u8 = b'D';
pub const TAG_NO_ADD: u8 = b'a';
pub const TAG_NO_DELETE: u8 = b'd';
pub const TAG_END: u8 = b'E';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Add,
    Delete,
    /// An add of a quad that was already present.
    NoAdd,
    /// A delete of a quad that was not present.
    NoDelete,
}

impl ChangeAction {
    pub fn tag(self) -> u8 {
        match self {
            Self::Add => TAG_ADD,
            Self::Delete => TAG_DELETE,
            Self::NoAdd => TAG_NO_ADD,
            Self::NoDelete => TAG_NO_DELETE,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_ADD => Some(Self::Add),
            TAG_DELETE => Some(Self::Delete),
            TAG_NO_ADD => Some(Self::NoAdd),
            TAG_NO_DELETE => Some(Self::NoDelete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub action: ChangeAction,
    pub quad: Quad,
}

impl ChangeRecord {
    pub fn new(action: ChangeAction, quad: Quad) -> Self {
        Self { action, quad }
    }
}

pub struct ChangeLogWriter<W: Write> {
    out: W,
    records: u64,
}

impl<W: Write> ChangeLogWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, records: 0 }
    }

    pub fn add(&mut self, quad: &Quad) -> StorageResult<()> {
        self.write(ChangeAction::Add, quad)
    }

    pub fn delete(&mut self, quad: &Quad) -> StorageResult<()> {
        self.write(ChangeAction::Delete, quad)
    }

    pub fn no_add(&mut self, quad: &Quad) -> StorageResult<()> {
        self.write(ChangeAction::NoAdd, quad)
    }

    pub fn no_delete(&mut self, quad: &Quad) -> StorageResult<()> {
        self.write(ChangeAction::NoDelete, quad)
    }

    pub fn write_record(&mut self, record: &ChangeRecord) -> StorageResult<()> {
        self.write(record.action, &record.quad)
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Writes the END tag, flushes and hands back the output.
    pub fn finish(mut self) -> StorageResult<W> {
        self.out.write_all(&[TAG_END])?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn write(&mut self, action: ChangeAction, quad: &Quad) -> StorageResult<()> {
        let mut buf = vec![action.tag()];
        for term in quad.terms() {
            let bytes = postcard::to_allocvec(term)
                .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
            let len = u32::try_from(bytes.len())
                .map_err(|_| StorageError::SerializationFailed(format!("term of {} bytes", bytes.len())))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(&bytes);
        }
        self.out.write_all(&buf)?;
        self.records += 1;
        Ok(())
    }
}

/// Reads change records up to the END tag.
///
/// A stream that ends before END, or carries a tag this reader does not know, yields an
/// error and then stops.
pub struct ChangeLogReader<R: Read> {
    input: R,
    done: bool,
}

impl<R: Read> ChangeLogReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, done: false }
    }

    fn read_record(&mut self) -> StorageResult<Option<ChangeRecord>> {
        let mut tag = [0u8; 1];
        read_exact(&mut self.input, &mut tag)?;
        if tag[0] == TAG_END {
            return Ok(None);
        }
        let action = ChangeAction::from_tag(tag[0]).ok_or(ChangeLogError::UnknownTag(tag[0]))?;
        let terms = [
            self.read_term()?,
            self.read_term()?,
            self.read_term()?,
            self.read_term()?,
        ];
        Ok(Some(ChangeRecord::new(action, Quad::from_terms(terms))))
    }

    fn read_term(&mut self) -> StorageResult<Term> {
        let mut len = [0u8; 4];
        read_exact(&mut self.input, &mut len)?;
        let len = u64::from(u32::from_le_bytes(len));
        // Grows with the bytes actually present, so a corrupt length cannot force a
        // large allocation.
        let mut bytes = Vec::new();
        if (&mut self.input).take(len).read_to_end(&mut bytes)? as u64 != len {
            return Err(ChangeLogError::MissingEnd.into());
        }
        postcard::from_bytes(&bytes).map_err(|e| ChangeLogError::BadTerm(e.to_string()).into())
    }
}

fn read_exact(input: &mut impl Read, buf: &mut [u8]) -> StorageResult<()> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ChangeLogError::MissingEnd.into()),
        Err(e) => Err(e.into()),
    }
}

impl<R: Read> Iterator for ChangeLogReader<R> {
    type Item = StorageResult<ChangeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub added: u64,
    pub deleted: u64,
    /// `NoAdd` and `NoDelete` records, which change nothing.
    pub skipped: u64,
}

/// Applies the change log read from `input` to `target` in one write transaction.
///
/// Any error, including a malformed log, aborts the transaction and leaves `target` as it
/// was.
pub fn replay<R, D>(input: R, target: &D) -> StorageResult<ReplayStats>
where
    R: Read,
    D: Dataset + ?Sized,
{
    let stats = execute_write(target, |txn| {
        let mut stats = ReplayStats::default();
        for record in ChangeLogReader::new(input) {
            let record = record?;
            match record.action {
                ChangeAction::Add => {
                    target.add(txn, &record.quad)?;
                    stats.added += 1;
                }
                ChangeAction::Delete => {
                    target.delete(txn, &record.quad)?;
                    stats.deleted += 1;
                }
                ChangeAction::NoAdd | ChangeAction::NoDelete => stats.skipped += 1,
            }
        }
        Ok::<_, StorageError>(stats)
    })?;
    info!(
        added = stats.added,
        deleted = stats.deleted,
        skipped = stats.skipped,
        "change log replayed"
    );
    Ok(stats)
}
