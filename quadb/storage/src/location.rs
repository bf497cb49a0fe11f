use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MEM_ID: AtomicU64 = AtomicU64::new(1);

/// Where a dataset lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// A memory-only dataset. Every call to [`Location::mem`] names a distinct one.
    Mem(u64),
    Dir(PathBuf),
}

impl Location {
    pub fn mem() -> Self {
        Self::Mem(NEXT_MEM_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// An on-disk location. Relative paths are made absolute so that two spellings of
    /// the same directory compare equal.
    pub fn dir(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self::Dir(std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()))
    }

    #[inline]
    pub fn is_mem(&self) -> bool {
        matches!(self, Self::Mem(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Mem(_) => None,
            Self::Dir(path) => Some(path),
        }
    }

    /// Path of `name` inside this location, for on-disk locations.
    pub fn file(&self, name: &str) -> Option<PathBuf> {
        self.path().map(|p| p.join(name))
    }

    /// True when the location is a directory holding at least one entry.
    pub fn has_content(&self) -> std::io::Result<bool> {
        match self {
            Self::Mem(_) => Ok(false),
            Self::Dir(path) if !path.exists() => Ok(false),
            Self::Dir(path) => Ok(std::fs::read_dir(path)?.next().is_some()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mem(id) => write!(f, "mem:{id}"),
            Self::Dir(path) => write!(f, "{}", path.display()),
        }
    }
}
