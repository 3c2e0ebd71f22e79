//! Transactional overlay over another chain store
//!
//! Reads fall through to the backing store and are cached. Writes,
//! removals and head changes are buffered in the overlay and never reach
//! the backing store until [`TemporaryChainStore::commit`] hands them back
//! as a [`StoreBatch`].

use crate::crypto::Hash;
use crate::storage::store::{
    BatchOp, ChainData, ChainEntry, ChainStore, HeadUpdate, StoreBatch, StoreError,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct TemporaryChainStore<'a, T: ChainData> {
    backing: &'a dyn ChainStore<T>,
    cache: Mutex<HashMap<Hash, ChainEntry<T>>>,
    writes: HashMap<Hash, Option<ChainEntry<T>>>,
    order: Vec<Hash>,
    head: Option<HeadUpdate>,
}

impl<'a, T: ChainData> TemporaryChainStore<'a, T> {
    pub fn new(backing: &'a dyn ChainStore<T>) -> Self {
        Self {
            backing,
            cache: Mutex::new(HashMap::new()),
            writes: HashMap::new(),
            order: Vec::new(),
            head: None,
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<Hash, ChainEntry<T>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn buffer(&mut self, hash: Hash, entry: Option<ChainEntry<T>>) {
        if self.writes.insert(hash, entry).is_none() {
            self.order.push(hash);
        }
    }

    /// Number of buffered writes and removals
    pub fn pending(&self) -> usize {
        self.order.len()
    }

    /// Consume the overlay and return its buffered changes, in the order
    /// they were first made.
    pub fn commit(mut self) -> StoreBatch<T> {
        let ops = self
            .order
            .iter()
            .filter_map(|hash| {
                self.writes.remove(hash).map(|write| match write {
                    Some(entry) => BatchOp::Put(entry),
                    None => BatchOp::Remove(*hash),
                })
            })
            .collect();
        StoreBatch {
            ops,
            head: self.head,
        }
    }
}

impl<T: ChainData> ChainStore<T> for TemporaryChainStore<'_, T> {
    fn get(&self, hash: &Hash) -> Result<Option<ChainEntry<T>>, StoreError> {
        if let Some(write) = self.writes.get(hash) {
            return Ok(write.clone());
        }
        if let Some(entry) = self.cache().get(hash) {
            return Ok(Some(entry.clone()));
        }

        let entry = self.backing.get(hash)?;
        if let Some(entry) = &entry {
            self.cache().insert(*hash, entry.clone());
        }
        Ok(entry)
    }

    fn put(&mut self, entry: ChainEntry<T>) -> Result<Hash, StoreError> {
        let hash = entry.hash();
        self.buffer(hash, Some(entry));
        Ok(hash)
    }

    fn remove(&mut self, hash: &Hash) -> Result<(), StoreError> {
        self.buffer(*hash, None);
        Ok(())
    }

    fn main_head_hash(&self) -> Result<Option<Hash>, StoreError> {
        match self.head {
            Some(HeadUpdate::Set(hash)) => Ok(Some(hash)),
            Some(HeadUpdate::Clear) => Ok(None),
            None => self.backing.main_head_hash(),
        }
    }

    fn set_main_head(&mut self, hash: Hash) -> Result<(), StoreError> {
        self.head = Some(HeadUpdate::Set(hash));
        Ok(())
    }

    fn clear_main_head(&mut self) -> Result<(), StoreError> {
        self.head = Some(HeadUpdate::Clear);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Block, BlockHeader, HeaderBuilder};
    use crate::storage::VolatileChainStore;

    fn child(parent: &BlockHeader, nonce: u64) -> BlockHeader {
        let mut builder = parent.to_builder();
        builder.prev_hash = parent.hash();
        builder.nonce = nonce;
        builder.seal()
    }

    #[test]
    fn test_writes_buffered_until_commit() {
        let genesis = Block::genesis().header.clone();
        let mut backing = VolatileChainStore::new();
        backing.put(ChainEntry::new(genesis.clone(), 1)).unwrap();
        backing.set_main_head(genesis.hash()).unwrap();

        let next = child(&genesis, 7);
        let batch = {
            let mut overlay = TemporaryChainStore::<BlockHeader>::new(&backing);
            assert_eq!(overlay.get(&genesis.hash()).unwrap().unwrap().height, 1);

            overlay.put(ChainEntry::new(next.clone(), 2)).unwrap();
            overlay.set_main_head(next.hash()).unwrap();
            overlay.remove(&genesis.hash()).unwrap();

            assert!(overlay.get(&genesis.hash()).unwrap().is_none());
            assert_eq!(overlay.main_head().unwrap().unwrap().data, next);
            assert_eq!(overlay.pending(), 2);

            // Backing store untouched
            assert!(backing.get(&next.hash()).unwrap().is_none());
            assert_eq!(backing.main_head_hash().unwrap(), Some(genesis.hash()));

            overlay.commit()
        };

        backing.write_batch(batch).unwrap();
        assert!(backing.get(&genesis.hash()).unwrap().is_none());
        assert_eq!(backing.main_head().unwrap().unwrap().height, 2);
    }

    #[test]
    fn test_last_write_wins() {
        let backing = VolatileChainStore::<BlockHeader>::new();
        let header = HeaderBuilder {
            prev_hash: Hash::NULL,
            body_hash: Hash::NULL,
            accounts_hash: Hash::NULL,
            difficulty: 0,
            timestamp: 0,
            nonce: 0,
        }
        .seal();

        let mut overlay = TemporaryChainStore::<BlockHeader>::new(&backing);
        overlay.put(ChainEntry::new(header.clone(), 5)).unwrap();
        overlay.remove(&header.hash()).unwrap();
        overlay.clear_main_head().unwrap();

        let batch = overlay.commit();
        assert_eq!(batch.ops.len(), 1);
        assert!(matches!(batch.ops[0], BatchOp::Remove(h) if h == header.hash()));
        assert_eq!(batch.head, Some(HeadUpdate::Clear));
    }
}
