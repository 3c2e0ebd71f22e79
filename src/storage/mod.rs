//! Storage module for header and block chains
//!
//! - [`ChainStore`]: the hash-keyed contract shared by every store
//! - [`PersistentChainStore`]: durable store over a [`KeyValueBackend`]
//! - [`VolatileChainStore`]: in-memory store
//! - [`TemporaryChainStore`]: buffered overlay committed as a [`StoreBatch`]

pub mod backend;
pub mod persistent;
pub mod store;
pub mod temporary;
pub mod volatile;

pub use backend::{FileBackend, KeyValueBackend};
pub use persistent::{PersistentChainStore, HEAD_KEY};
pub use store::{
    BatchOp, ChainData, ChainEntry, ChainStore, HeadUpdate, StoreBatch, StoreError,
};
pub use temporary::TemporaryChainStore;
pub use volatile::VolatileChainStore;
