//! Chainsync: a peer-to-peer proof-of-work chain sync engine
//!
//! This crate provides:
//! - A header proof chain with proof-of-work and difficulty retargeting
//! - A full-block chain with an accounts ledger, fork storage and rebranching
//! - Light ("mini") clients that verify an accounts snapshot by replaying
//!   the most recent blocks
//! - A per-peer sync agent driving inventory exchange over a binary protocol
//! - Persistent, volatile and temporary hash-keyed chain stores
//!
//! # Example
//!
//! ```rust
//! use chainsync_node::config::{ChainPolicy, ClientMode};
//! use chainsync_node::consensus::BlockChain;
//! use chainsync_node::core::Address;
//! use chainsync_node::mining::Miner;
//!
//! let mut chain = BlockChain::volatile(ClientMode::Full, ChainPolicy::default()).unwrap();
//! let miner = Miner::new(Address::from_seed(b"alice"));
//! let (block, _stats) = miner.mine_block(&mut chain, vec![]).unwrap();
//! assert_eq!(chain.head_hash(), block.hash());
//! assert_eq!(chain.height(), 2);
//! ```

pub mod config;
pub mod consensus;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use config::{ChainPolicy, ClientMode, ConsensusConfig, NodeConfig};
pub use consensus::{BlockChain, ChainError, PeerSyncAgent, ProofChain};
pub use core::{Block, BlockHeader, InvVector, Transaction, BLOCK_REWARD};
pub use crypto::Hash;
pub use mining::{Mempool, Miner};
pub use network::{Message, NodeContext};
