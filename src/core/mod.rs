//! Core blockchain components
//!
//! This module contains the fundamental building blocks:
//! - Binary serialization shared by the wire and the stores
//! - Block headers (immutable, with a separate mining builder)
//! - Blocks and block bodies, including the genesis block
//! - Value-transfer transactions and account addresses
//! - Inventory vectors

pub mod block;
pub mod header;
pub mod inv;
pub mod serial;
pub mod transaction;

pub use block::{
    Block, BlockBody, BLOCK_REWARD, GENESIS_DIFFICULTY, GENESIS_TIMESTAMP, MAX_BLOCK_TRANSACTIONS,
};
pub use header::{current_timestamp, BlockHeader, HeaderBuilder, HEADER_SIZE};
pub use inv::{InvType, InvVector};
pub use serial::{Decode, Encode, FormatError};
pub use transaction::{Address, Transaction, ADDRESS_SIZE, TRANSACTION_SIZE};
