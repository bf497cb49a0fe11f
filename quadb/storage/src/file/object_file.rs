// object_file.rs
// Append-only file of length-prefixed objects.
//
// Object layout (little-endian):
// ┌────────────┬───────────┐
// │ u32 len    │ bytes…    │
// └────────────┴───────────┘
//
// An object is addressed by the offset of its length prefix. The file keeps a
// committed length next to it in `<name>.state`; anything past that length was
// written by a transaction that never committed and is cut off when the owning
// component starts.
//
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::location::Location;

const LEN_SIZE: u64 = 4;
const COPY_BUFFER_SIZE: usize = 64 * 1024;

enum Backing {
    Memory(Vec<u8>),
    Disk { file: File },
}

struct Inner {
    backing: Backing,
    length: u64,
    committed: u64,
}

pub struct ObjectFile {
    name: String,
    data_path: Option<PathBuf>,
    state_path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl ObjectFile {
    /// Opens `name` at `location`. Nothing is truncated: bytes past the committed length
    /// stay readable until [`Self::truncate_to_committed`] so that recovery can move the
    /// committed length forward first.
    pub fn open(location: &Location, name: &str) -> StorageResult<Self> {
        let (data_path, state_path) = match location {
            Location::Mem(_) => (None, None),
            Location::Dir(dir) => {
                fs::create_dir_all(dir)?;
                (
                    Some(dir.join(format!("{name}.dat"))),
                    Some(dir.join(format!("{name}.state"))),
                )
            }
        };
        let inner = match (&data_path, &state_path) {
            (Some(data_path), Some(state_path)) => {
                let file = OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .read(true)
                    .write(true)
                    .open(data_path)?;
                let length = file.metadata()?.len();
                Inner {
                    backing: Backing::Disk { file },
                    length,
                    committed: read_state(state_path)?,
                }
            }
            _ => Inner {
                backing: Backing::Memory(Vec::new()),
                length: 0,
                committed: 0,
            },
        };
        Ok(Self {
            name: name.to_string(),
            data_path,
            state_path,
            inner: Mutex::new(inner),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    /// Offset the next object would be written at.
    pub fn length(&self) -> u64 {
        self.inner.lock().length
    }

    pub fn committed_length(&self) -> u64 {
        self.inner.lock().committed
    }

    /// Appends one object and returns its offset.
    pub fn append(&self, bytes: &[u8]) -> StorageResult<u64> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            StorageError::SerializationFailed(format!("object of {} bytes", bytes.len()))
        })?;
        let mut inner = self.inner.lock();
        let offset = inner.length;
        match &mut inner.backing {
            Backing::Memory(data) => {
                data.extend_from_slice(&len.to_le_bytes());
                data.extend_from_slice(bytes);
            }
            Backing::Disk { file } => {
                let mut data = Vec::with_capacity(LEN_SIZE as usize + bytes.len());
                data.extend_from_slice(&len.to_le_bytes());
                data.extend_from_slice(bytes);
                file.seek(SeekFrom::Start(offset))?;
                if let Err(e) = file.write_all(&data) {
                    file.set_len(offset)?;
                    return Err(e.into());
                }
            }
        }
        inner.length = offset + LEN_SIZE + u64::from(len);
        Ok(offset)
    }

    /// Reads the object at `offset`.
    pub fn read(&self, offset: u64) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let length = inner.length;
        if offset + LEN_SIZE > length {
            return Err(self.corrupt(format!("no object at offset {offset}")));
        }
        let mut header = [0u8; LEN_SIZE as usize];
        read_at(&mut inner.backing, offset, &mut header)?;
        let len = u64::from(u32::from_le_bytes(header));
        if offset + LEN_SIZE + len > length {
            return Err(self.corrupt(format!("object at offset {offset} runs past the end")));
        }
        let mut bytes = vec![0u8; len as usize];
        read_at(&mut inner.backing, offset + LEN_SIZE, &mut bytes)?;
        Ok(bytes)
    }

    /// Every object stored before `upto`, with its offset.
    pub fn objects(&self, upto: u64) -> StorageResult<Vec<(u64, Vec<u8>)>> {
        let mut objects = Vec::new();
        let mut offset = 0;
        while offset < upto {
            let bytes = self.read(offset)?;
            let next = offset + LEN_SIZE + bytes.len() as u64;
            objects.push((offset, bytes));
            offset = next;
        }
        if offset != upto {
            return Err(self.corrupt(format!("object boundary mismatch at {upto}")));
        }
        Ok(objects)
    }

    /// Flushes appended objects to stable storage.
    pub fn sync(&self) -> StorageResult<()> {
        if let Backing::Disk { file } = &self.inner.lock().backing {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Records `length` as committed. The object data up to `length` must already be
    /// synced.
    pub fn set_committed(&self, length: u64) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if length > inner.length {
            return Err(self.corrupt(format!(
                "committed length {length} beyond end of file {}",
                inner.length
            )));
        }
        if let Some(state_path) = &self.state_path {
            write_state(state_path, length)?;
        }
        inner.committed = length;
        Ok(())
    }

    /// Drops everything past `length`.
    pub fn truncate(&self, length: u64) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        match &mut inner.backing {
            Backing::Memory(data) => data.truncate(length as usize),
            Backing::Disk { file } => file.set_len(length)?,
        }
        inner.length = length;
        Ok(())
    }

    pub fn truncate_to_committed(&self) -> StorageResult<()> {
        let committed = self.committed_length();
        self.truncate(committed)
    }

    /// Copies the first `upto` bytes to `<name>.dat` at `target` and marks them committed
    /// there. Only on-disk files can be copied.
    pub fn copy_raw(&self, upto: u64, target: &Location) -> StorageResult<()> {
        let (Some(source_path), Location::Dir(dir)) = (&self.data_path, target) else {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "raw copy needs on-disk source and target",
            )));
        };
        fs::create_dir_all(dir)?;
        let mut source = File::open(source_path)?;
        let mut dest = File::create(dir.join(format!("{}.dat", self.name)))?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut remaining = upto;
        while remaining > 0 {
            let want = remaining.min(COPY_BUFFER_SIZE as u64) as usize;
            let n = source.read(&mut buffer[..want])?;
            if n == 0 {
                break;
            }
            dest.write_all(&buffer[..n])?;
            remaining -= n as u64;
            if n < want {
                break;
            }
        }
        if remaining > 0 {
            return Err(self.corrupt(format!("short read copying {upto} bytes")));
        }
        dest.sync_all()?;
        write_state(&dir.join(format!("{}.state", self.name)), upto)
    }

    fn corrupt(&self, reason: String) -> StorageError {
        StorageError::Corrupt {
            file: self.name.clone(),
            reason,
        }
    }
}

fn read_at(backing: &mut Backing, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    match backing {
        Backing::Memory(data) => {
            let start = offset as usize;
            buf.copy_from_slice(&data[start..start + buf.len()]);
            Ok(())
        }
        Backing::Disk { file } => {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)
        }
    }
}

fn read_state(path: &Path) -> StorageResult<u64> {
    match fs::read(path) {
        Ok(bytes) => {
            let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| StorageError::Corrupt {
                file: path.display().to_string(),
                reason: format!("state file has {} bytes", bytes.len()),
            })?;
            Ok(u64::from_le_bytes(bytes))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Writes a committed length next to its data file and syncs it.
pub(crate) fn write_state(path: &Path, length: u64) -> StorageResult<()> {
    let tmp = path.with_extension("state-tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&length.to_le_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
