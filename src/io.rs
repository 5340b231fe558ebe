//! Positional file I/O and the single-writer lock.
//!
//! All access goes through `read_exactly` / `write_all_at`; there is no
//! seek-based path. The advisory lock is taken at open and held for the
//! life of the process.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, WaxError};

/// Lock mode requested at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Exclusive,
    Shared,
}

/// An open store file with its advisory lock held.
#[derive(Debug)]
pub struct StoreFile {
    file: File,
    path: PathBuf,
}

impl StoreFile {
    /// Open (creating if `create`) and lock the file. An existing
    /// exclusive holder makes a read-write open fail with `locked`.
    pub fn open(path: &Path, mode: LockMode, create: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == LockMode::Exclusive)
            .create(create)
            .open(path)?;

        let locked = match mode {
            LockMode::Exclusive => fs2::FileExt::try_lock_exclusive(&file),
            LockMode::Shared => fs2::FileExt::try_lock_shared(&file),
        };
        if let Err(e) = locked {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                return Err(WaxError::Locked);
            }
            return Err(e.into());
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Grow (or shrink) the file to `len` bytes.
    pub fn set_len(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Positional write of the whole buffer. Short writes are retried by
    /// the platform primitive; any residue is an error.
    pub fn write_all_at(&self, data: &[u8], offset: u64) -> Result<()> {
        self.file
            .write_all_at(data, offset)
            .map_err(WaxError::from)
    }

    /// Positional read of exactly `len` bytes.
    pub fn read_exactly(&self, len: usize, offset: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, offset).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                WaxError::io(format!(
                    "short read: {len} bytes at offset {offset} past end of file"
                ))
            } else {
                e.into()
            }
        })?;
        Ok(buf)
    }

    /// Flush file data and metadata to stable storage.
    pub fn fsync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_at_offsets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("io.mv2s");
        let f = StoreFile::open(&path, LockMode::Exclusive, true).unwrap();

        f.write_all_at(b"hello", 100).unwrap();
        f.write_all_at(b"world", 4096).unwrap();
        f.fsync().unwrap();

        assert_eq!(f.read_exactly(5, 100).unwrap(), b"hello");
        assert_eq!(f.read_exactly(5, 4096).unwrap(), b"world");
    }

    #[test]
    fn test_short_read_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("io.mv2s");
        let f = StoreFile::open(&path, LockMode::Exclusive, true).unwrap();
        f.write_all_at(b"abc", 0).unwrap();

        let err = f.read_exactly(10, 0).unwrap_err();
        assert!(err.to_string().contains("short read"));
    }

    #[test]
    fn test_exclusive_lock_conflicts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("io.mv2s");
        let holder = StoreFile::open(&path, LockMode::Exclusive, true).unwrap();

        let err = StoreFile::open(&path, LockMode::Exclusive, false).unwrap_err();
        assert!(matches!(err, WaxError::Locked));
        drop(holder);

        // Released lock can be re-acquired.
        StoreFile::open(&path, LockMode::Exclusive, false).unwrap();
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("io.mv2s");
        StoreFile::open(&path, LockMode::Exclusive, true).unwrap();

        let a = StoreFile::open(&path, LockMode::Shared, false).unwrap();
        let b = StoreFile::open(&path, LockMode::Shared, false).unwrap();
        drop(a);
        drop(b);
    }
}
