//! Chain store contract
//!
//! A chain store maps content hashes to chain entries and keeps a single
//! "main head" pointer. Header chains and block chains share this contract
//! through the [`ChainData`] trait.

use crate::core::serial::{read_u32, Decode, Encode, FormatError};
use crate::core::{Block, BlockHeader};
use crate::crypto::Hash;
use bytes::{BufMut, BytesMut};
use std::io;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Corrupt entry {key}: {source}")]
    Corrupt { key: String, source: FormatError },
}

/// Data that can be linked into a chain by hash
pub trait ChainData: Clone + Encode + Decode + Send + Sync + 'static {
    fn hash(&self) -> Hash;
    fn prev_hash(&self) -> Hash;
}

impl ChainData for BlockHeader {
    fn hash(&self) -> Hash {
        BlockHeader::hash(self)
    }

    fn prev_hash(&self) -> Hash {
        BlockHeader::prev_hash(self)
    }
}

impl ChainData for Block {
    fn hash(&self) -> Hash {
        Block::hash(self)
    }

    fn prev_hash(&self) -> Hash {
        Block::prev_hash(self)
    }
}

/// A stored element and its height on the chain it was accepted into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry<T> {
    pub data: T,
    pub height: u32,
}

impl<T: ChainData> ChainEntry<T> {
    pub fn new(data: T, height: u32) -> Self {
        Self { data, height }
    }

    pub fn hash(&self) -> Hash {
        self.data.hash()
    }
}

impl<T: ChainData> Encode for ChainEntry<T> {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.height);
        self.data.encode(buf);
    }
}

impl<T: ChainData> Decode for ChainEntry<T> {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        let height = read_u32(buf, "height")?;
        Ok(Self {
            data: T::decode(buf)?,
            height,
        })
    }
}

/// Pending change to the main head pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadUpdate {
    Set(Hash),
    Clear,
}

/// A single buffered write
#[derive(Debug, Clone)]
pub enum BatchOp<T> {
    Put(ChainEntry<T>),
    Remove(Hash),
}

/// Buffered writes applied to a store in one step
#[derive(Debug, Clone)]
pub struct StoreBatch<T> {
    pub ops: Vec<BatchOp<T>>,
    pub head: Option<HeadUpdate>,
}

impl<T> Default for StoreBatch<T> {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            head: None,
        }
    }
}

impl<T> StoreBatch<T> {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.head.is_none()
    }
}

/// Hash-keyed storage for chain entries
pub trait ChainStore<T: ChainData>: Send + Sync {
    fn get(&self, hash: &Hash) -> Result<Option<ChainEntry<T>>, StoreError>;

    fn put(&mut self, entry: ChainEntry<T>) -> Result<Hash, StoreError>;

    fn remove(&mut self, hash: &Hash) -> Result<(), StoreError>;

    fn main_head_hash(&self) -> Result<Option<Hash>, StoreError>;

    fn set_main_head(&mut self, hash: Hash) -> Result<(), StoreError>;

    fn clear_main_head(&mut self) -> Result<(), StoreError>;

    fn main_head(&self) -> Result<Option<ChainEntry<T>>, StoreError> {
        match self.main_head_hash()? {
            Some(hash) => self.get(&hash),
            None => Ok(None),
        }
    }

    /// Apply buffered writes in order, then the head change.
    fn write_batch(&mut self, batch: StoreBatch<T>) -> Result<(), StoreError> {
        for op in batch.ops {
            match op {
                BatchOp::Put(entry) => {
                    self.put(entry)?;
                }
                BatchOp::Remove(hash) => self.remove(&hash)?,
            }
        }
        match batch.head {
            Some(HeadUpdate::Set(hash)) => self.set_main_head(hash),
            Some(HeadUpdate::Clear) => self.clear_main_head(),
            None => Ok(()),
        }
    }
}

impl<T: ChainData, S: ChainStore<T> + ?Sized> ChainStore<T> for Box<S> {
    fn get(&self, hash: &Hash) -> Result<Option<ChainEntry<T>>, StoreError> {
        (**self).get(hash)
    }

    fn put(&mut self, entry: ChainEntry<T>) -> Result<Hash, StoreError> {
        (**self).put(entry)
    }

    fn remove(&mut self, hash: &Hash) -> Result<(), StoreError> {
        (**self).remove(hash)
    }

    fn main_head_hash(&self) -> Result<Option<Hash>, StoreError> {
        (**self).main_head_hash()
    }

    fn set_main_head(&mut self, hash: Hash) -> Result<(), StoreError> {
        (**self).set_main_head(hash)
    }

    fn clear_main_head(&mut self) -> Result<(), StoreError> {
        (**self).clear_main_head()
    }

    fn write_batch(&mut self, batch: StoreBatch<T>) -> Result<(), StoreError> {
        (**self).write_batch(batch)
    }
}
