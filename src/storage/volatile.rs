//! In-memory chain store, lives as long as the process

use crate::crypto::Hash;
use crate::storage::store::{ChainData, ChainEntry, ChainStore, StoreError};
use std::collections::HashMap;

#[derive(Debug)]
pub struct VolatileChainStore<T> {
    entries: HashMap<Hash, ChainEntry<T>>,
    head: Option<Hash>,
}

impl<T> Default for VolatileChainStore<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            head: None,
        }
    }
}

impl<T> VolatileChainStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ChainData> ChainStore<T> for VolatileChainStore<T> {
    fn get(&self, hash: &Hash) -> Result<Option<ChainEntry<T>>, StoreError> {
        Ok(self.entries.get(hash).cloned())
    }

    fn put(&mut self, entry: ChainEntry<T>) -> Result<Hash, StoreError> {
        let hash = entry.hash();
        self.entries.insert(hash, entry);
        Ok(hash)
    }

    fn remove(&mut self, hash: &Hash) -> Result<(), StoreError> {
        self.entries.remove(hash);
        Ok(())
    }

    fn main_head_hash(&self) -> Result<Option<Hash>, StoreError> {
        Ok(self.head)
    }

    fn set_main_head(&mut self, hash: Hash) -> Result<(), StoreError> {
        self.head = Some(hash);
        Ok(())
    }

    fn clear_main_head(&mut self) -> Result<(), StoreError> {
        self.head = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Block, BlockHeader};

    #[test]
    fn test_put_get_remove() {
        let mut store = VolatileChainStore::<BlockHeader>::new();
        let header = Block::genesis().header.clone();
        let hash = store.put(ChainEntry::new(header.clone(), 1)).unwrap();
        assert_eq!(hash, header.hash());
        assert_eq!(store.get(&hash).unwrap().unwrap().height, 1);

        store.set_main_head(hash).unwrap();
        assert_eq!(store.main_head().unwrap().unwrap().data, header);

        store.remove(&hash).unwrap();
        assert!(store.get(&hash).unwrap().is_none());
        assert!(store.main_head().unwrap().is_none());
        assert!(store.is_empty());
    }
}
