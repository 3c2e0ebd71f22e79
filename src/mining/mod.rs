//! Mining module for block creation and transaction pooling

pub mod mempool;
pub mod miner;

pub use mempool::{Mempool, MempoolEntry, MempoolError, MempoolEvent};
pub use miner::{Miner, MiningStats};
