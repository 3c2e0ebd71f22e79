//! Block implementation for the blockchain
//!
//! A block is a sealed header plus a body naming the miner and listing the
//! transactions. The header commits to the body through `body_hash`.

use crate::consensus::accounts::{Accounts, MemoryAccounts};
use crate::core::header::BlockHeader;
use crate::core::serial::{read_list, write_list, Decode, Encode, FormatError};
use crate::core::transaction::{Address, Transaction};
use crate::crypto::Hash;
use bytes::BytesMut;
use std::sync::OnceLock;

// =============================================================================
// Block Constants
// =============================================================================

/// Maximum number of transactions per block
pub const MAX_BLOCK_TRANSACTIONS: usize = u16::MAX as usize;

/// Reward credited to the miner of every block, on top of fees
pub const BLOCK_REWARD: u64 = 50;

/// Timestamp of the genesis block
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Difficulty declared by the genesis block
pub const GENESIS_DIFFICULTY: u32 = 1;

/// Block contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBody {
    /// Receives the reward and all fees
    pub miner: Address,
    pub transactions: Vec<Transaction>,
}

impl BlockBody {
    pub fn new(miner: Address, transactions: Vec<Transaction>) -> Self {
        Self {
            miner,
            transactions,
        }
    }

    /// Hash committed to by the header
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.to_bytes())
    }

    /// Sum of all transaction fees
    pub fn total_fees(&self) -> Option<u64> {
        self.transactions
            .iter()
            .try_fold(0u64, |acc, tx| acc.checked_add(tx.fee))
    }
}

impl Encode for BlockBody {
    fn encode(&self, buf: &mut BytesMut) {
        self.miner.encode(buf);
        write_list(buf, &self.transactions);
    }
}

impl Decode for BlockBody {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        Ok(Self {
            miner: Address::decode(buf)?,
            transactions: read_list(buf, MAX_BLOCK_TRANSACTIONS, "transactions")?,
        })
    }
}

/// A block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    /// The genesis block shared by every node
    pub fn genesis() -> &'static Block {
        static GENESIS: OnceLock<Block> = OnceLock::new();
        GENESIS.get_or_init(|| {
            let body = BlockBody::new(Address::from_seed(b"genesis"), Vec::new());
            let mut accounts = MemoryAccounts::new();
            // A fresh ledger always accepts the reward-only genesis body.
            let _ = accounts.apply_block(&body);
            let header = BlockHeader::new(
                Hash::NULL,
                body.hash(),
                accounts.hash(),
                GENESIS_DIFFICULTY,
                GENESIS_TIMESTAMP,
                0,
            );
            Block::new(header, body)
        })
    }

    /// Hash of the genesis block
    pub fn genesis_hash() -> Hash {
        Self::genesis().hash()
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn prev_hash(&self) -> Hash {
        self.header.prev_hash()
    }

    /// Verify the header commits to this body
    pub fn verify_body_hash(&self) -> bool {
        self.body.hash() == self.header.body_hash()
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.body.transactions.len()
    }
}

impl Encode for Block {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.body.encode(buf);
    }
}

impl Decode for Block {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        Ok(Self {
            header: BlockHeader::decode(buf)?,
            body: BlockBody::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::HeaderBuilder;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();
        assert!(genesis.prev_hash().is_null());
        assert!(genesis.verify_body_hash());
        assert_eq!(genesis.header.difficulty(), GENESIS_DIFFICULTY);
        assert_eq!(Block::genesis_hash(), genesis.hash());
    }

    #[test]
    fn test_body_hash_verification() {
        let body = BlockBody::new(
            Address::from_seed(b"miner"),
            vec![Transaction::new(
                Address::from_seed(b"a"),
                Address::from_seed(b"b"),
                5,
                1,
                0,
            )],
        );
        let header = HeaderBuilder {
            prev_hash: Block::genesis_hash(),
            body_hash: body.hash(),
            accounts_hash: Hash::NULL,
            difficulty: 0,
            timestamp: GENESIS_TIMESTAMP + 60,
            nonce: 0,
        }
        .seal();
        let mut block = Block::new(header, body);
        assert!(block.verify_body_hash());
        assert_eq!(block.body.total_fees(), Some(1));

        // Tamper with the body
        block.body.transactions[0].value = 500;
        assert!(!block.verify_body_hash());
    }

    #[test]
    fn test_block_encoding() {
        let block = Block::genesis().clone();
        let bytes = block.to_bytes();
        assert_eq!(Block::from_bytes(&bytes).unwrap(), block);
    }
}
