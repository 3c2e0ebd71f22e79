//! Consensus engine
//!
//! - [`ProofChain`]: header-only chain with proof-of-work and retarget checks
//! - [`BlockChain`]: full blocks plus accounts state on top of a proof chain
//! - [`PeerSyncAgent`]: per-peer state machine that brings both in line with
//!   a remote node

pub mod accounts;
pub mod agent;
pub mod blockchain;
pub mod difficulty;
pub mod error;
pub mod inventory;
pub mod path;
pub mod proofchain;
pub mod timers;

pub use accounts::{Accounts, AccountsError, AccountsTreeNode, MemoryAccounts};
pub use agent::{AgentEvent, Inbound, PeerSyncAgent, SyncState};
pub use blockchain::{BlockChain, BoxedStore, ChainEvent, PushResult, RejectReason};
pub use error::ChainError;
pub use inventory::InventoryExchange;
pub use path::MainPath;
pub use proofchain::{ProofChain, PushOutcome, Speculation};
