//! Key-value backends
//!
//! The durable chain store is written against [`KeyValueBackend`] so the
//! on-disk layout can change without touching chain logic.

use crate::storage::store::StoreError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Minimal byte-oriented key-value store
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// One file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open (and create if needed) the backend directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        // Write to temporary file first
        let temp_path = self.dir.join(format!("{}.tmp", key));
        fs::write(&temp_path, value)?;

        // Atomic rename
        fs::rename(&temp_path, self.path(key))?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_backend() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(dir.path().join("kv")).unwrap();

        assert!(backend.get("missing").unwrap().is_none());
        backend.put("key", b"value").unwrap();
        assert_eq!(backend.get("key").unwrap().unwrap(), b"value");

        backend.put("key", b"other").unwrap();
        assert_eq!(backend.get("key").unwrap().unwrap(), b"other");
        assert!(!backend.dir().join("key.tmp").exists());

        backend.remove("key").unwrap();
        backend.remove("key").unwrap();
        assert!(backend.get("key").unwrap().is_none());
    }
}
