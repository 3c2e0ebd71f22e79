//! Durable chain store on top of a key-value backend
//!
//! Entries are stored under their hex hash; the main head pointer is
//! stored under the key `main`.

use crate::core::serial::{Decode, Encode};
use crate::crypto::Hash;
use crate::storage::backend::{FileBackend, KeyValueBackend};
use crate::storage::store::{ChainData, ChainEntry, ChainStore, StoreError};
use std::marker::PhantomData;
use std::path::Path;

/// Key holding the main head hash
pub const HEAD_KEY: &str = "main";

pub struct PersistentChainStore<T, B = FileBackend> {
    backend: B,
    _data: PhantomData<fn() -> T>,
}

impl<T: ChainData, B: KeyValueBackend> PersistentChainStore<T, B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            _data: PhantomData,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<T: ChainData> PersistentChainStore<T, FileBackend> {
    /// Open a file-backed store in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::new(FileBackend::open(dir)?))
    }
}

impl<T: ChainData, B: KeyValueBackend> ChainStore<T> for PersistentChainStore<T, B> {
    fn get(&self, hash: &Hash) -> Result<Option<ChainEntry<T>>, StoreError> {
        let key = hash.to_hex();
        match self.backend.get(&key)? {
            Some(data) => ChainEntry::from_bytes(&data)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { key, source }),
            None => Ok(None),
        }
    }

    fn put(&mut self, entry: ChainEntry<T>) -> Result<Hash, StoreError> {
        let hash = entry.hash();
        self.backend.put(&hash.to_hex(), &entry.to_bytes())?;
        Ok(hash)
    }

    fn remove(&mut self, hash: &Hash) -> Result<(), StoreError> {
        self.backend.remove(&hash.to_hex())
    }

    fn main_head_hash(&self) -> Result<Option<Hash>, StoreError> {
        match self.backend.get(HEAD_KEY)? {
            Some(data) => Hash::from_bytes(&data)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    key: HEAD_KEY.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn set_main_head(&mut self, hash: Hash) -> Result<(), StoreError> {
        self.backend.put(HEAD_KEY, hash.as_bytes())
    }

    fn clear_main_head(&mut self) -> Result<(), StoreError> {
        self.backend.remove(HEAD_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Block, BlockHeader};
    use tempfile::tempdir;

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let genesis = Block::genesis().clone();
        let hash = genesis.hash();

        {
            let mut store = PersistentChainStore::<Block>::open(dir.path()).unwrap();
            store.put(ChainEntry::new(genesis.clone(), 1)).unwrap();
            store.set_main_head(hash).unwrap();
        }

        let store = PersistentChainStore::<Block>::open(dir.path()).unwrap();
        let head = store.main_head().unwrap().unwrap();
        assert_eq!(head.data, genesis);
        assert_eq!(head.height, 1);
    }

    #[test]
    fn test_corrupt_entry_reported() {
        let dir = tempdir().unwrap();
        let mut store = PersistentChainStore::<BlockHeader>::open(dir.path()).unwrap();
        let hash = Hash::digest(b"junk");
        std::fs::write(dir.path().join(hash.to_hex()), b"\x00\x00").unwrap();

        assert!(matches!(
            store.get(&hash),
            Err(StoreError::Corrupt { .. })
        ));
        store.clear_main_head().unwrap();
        assert!(store.main_head().unwrap().is_none());
    }
}
