//! Mining engine for the chain
//!
//! Builds a block on the current head, computes its accounts hash on a
//! temporary accounts fork, and searches for a nonce.

use crate::consensus::{BlockChain, ChainError, PushResult, RejectReason};
use crate::core::{current_timestamp, Address, Block, BlockBody, HeaderBuilder, Transaction};
use log::info;
use std::time::Instant;

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

/// Miner for creating new blocks
pub struct Miner {
    /// Address receiving rewards and fees
    pub address: Address,
}

impl Miner {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    /// Mine a block on the chain head without adding it
    pub fn build_block(
        &self,
        chain: &BlockChain,
        transactions: Vec<Transaction>,
        timestamp: u64,
    ) -> Result<(Block, MiningStats), ChainError> {
        let start = Instant::now();

        let body = BlockBody::new(self.address, transactions);
        let mut accounts = chain.create_temporary_accounts();
        accounts.apply_block(&body)?;

        let builder = HeaderBuilder {
            prev_hash: chain.head_hash(),
            body_hash: body.hash(),
            accounts_hash: accounts.hash(),
            difficulty: chain.proofchain().next_difficulty()?,
            timestamp,
            nonce: 0,
        };

        info!(
            "Mining block {} with difficulty {}...",
            chain.height() + 1,
            builder.difficulty
        );

        let (header, attempts) = builder.mine();

        let elapsed = start.elapsed().as_millis();
        let hash_rate = if elapsed > 0 {
            (attempts as f64) / (elapsed as f64 / 1000.0)
        } else {
            attempts as f64
        };

        let stats = MiningStats {
            hash_attempts: attempts,
            time_ms: elapsed,
            hash_rate,
        };

        info!(
            "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
            header.hash(),
            elapsed,
            attempts,
            hash_rate
        );

        Ok((Block::new(header, body), stats))
    }

    /// Mine a block and push it onto the chain
    pub fn mine_block(
        &self,
        chain: &mut BlockChain,
        transactions: Vec<Transaction>,
    ) -> Result<(Block, MiningStats), ChainError> {
        let timestamp = current_timestamp().max(chain.head().data.header.timestamp());
        let (block, stats) = self.build_block(chain, transactions, timestamp)?;

        match chain.push_block(block.clone())? {
            PushResult::Extended => Ok((block, stats)),
            PushResult::Rejected(RejectReason::Invalid(e)) => Err(e),
            _ => Err(ChainError::DoesNotChain(block.hash())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::blockchain::tests::full_chain;
    use crate::crypto::meets_difficulty;

    #[test]
    fn test_miner() {
        let mut chain = full_chain();
        let miner = Miner::new(Address::from_seed(b"miner"));

        let (block, stats) = miner.mine_block(&mut chain, vec![]).unwrap();

        assert_eq!(chain.height(), 2);
        assert_eq!(chain.head_hash(), block.hash());
        assert!(meets_difficulty(block.hash().as_bytes(), block.header.difficulty()));
        assert!(stats.hash_attempts > 0);
    }

    #[test]
    fn test_mine_multiple_blocks() {
        let mut chain = full_chain();
        let miner = Miner::new(Address::from_seed(b"miner"));

        for _ in 0..3 {
            miner.mine_block(&mut chain, vec![]).unwrap();
        }

        assert_eq!(chain.height(), 4);
        assert_eq!(chain.verify().unwrap(), 4);
    }

    #[test]
    fn test_rejects_overspending_body() {
        let chain = full_chain();
        let miner = Miner::new(Address::from_seed(b"miner"));
        let tx = Transaction::new(
            Address::from_seed(b"nobody"),
            Address::from_seed(b"bob"),
            5,
            0,
            0,
        );
        assert!(matches!(
            miner.build_block(&chain, vec![tx], current_timestamp()),
            Err(ChainError::Accounts(_))
        ));
    }
}
