//! Transaction pool (mempool) for pending transactions
//!
//! Holds unconfirmed transfers waiting to be mined. Admission checks the
//! sender's balance and nonce against the chain's accounts state plus the
//! sender's transactions already pending.
//!
//! Features:
//! - Fee-based prioritization
//! - Low-fee eviction at capacity
//! - Eviction of mined and stale transactions on head change
//! - `TransactionAdded` / `TransactionsReady` notifications

use crate::consensus::BlockChain;
use crate::core::{Address, Block, Transaction};
use crate::crypto::Hash;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::broadcast;

// =============================================================================
// Configuration
// =============================================================================

/// Default maximum mempool transaction count
pub const DEFAULT_MEMPOOL_SIZE: usize = 10_000;

// =============================================================================
// Error Types
// =============================================================================

/// Mempool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Transaction already exists")]
    DuplicateTransaction,
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Accounts state unavailable")]
    AccountsUnavailable,
    #[error("Nonce mismatch for {address}: expected {expected}, got {got}")]
    NonceMismatch {
        address: Address,
        expected: u32,
        got: u32,
    },
    #[error("Insufficient funds for {address}: balance {balance}, needed {needed}")]
    InsufficientFunds {
        address: Address,
        balance: u64,
        needed: u64,
    },
    #[error("Mempool full")]
    MempoolFull,
}

/// Mempool notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MempoolEvent {
    TransactionAdded(Transaction),
    /// Pool revalidated after a head change
    TransactionsReady,
}

// =============================================================================
// Mempool Entry
// =============================================================================

/// Entry in the mempool with metadata
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    /// When the transaction was added (Unix timestamp)
    pub added_time: u64,
}

impl MempoolEntry {
    pub fn new(tx: Transaction, added_time: u64) -> Self {
        Self { tx, added_time }
    }
}

// =============================================================================
// Mempool
// =============================================================================

/// Memory pool for pending transactions
#[derive(Debug)]
pub struct Mempool {
    /// Transactions indexed by hash
    entries: HashMap<Hash, MempoolEntry>,
    /// Hashes ordered by fee (highest first)
    by_fee: Vec<Hash>,
    max_size: usize,
    events: broadcast::Sender<MempoolEvent>,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

impl Mempool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMPOOL_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            entries: HashMap::new(),
            by_fee: Vec::new(),
            max_size,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MempoolEvent> {
        self.events.subscribe()
    }

    /// Admit a transaction after checking it against the chain's accounts
    pub fn push_transaction(
        &mut self,
        tx: Transaction,
        chain: &BlockChain,
    ) -> Result<(), MempoolError> {
        let hash = tx.hash();
        if self.entries.contains_key(&hash) {
            return Err(MempoolError::DuplicateTransaction);
        }
        let cost = tx
            .total_cost()
            .ok_or_else(|| MempoolError::InvalidTransaction("value overflow".to_string()))?;
        if tx.value == 0 {
            return Err(MempoolError::InvalidTransaction("zero value".to_string()));
        }
        if !chain.accounts_complete() {
            return Err(MempoolError::AccountsUnavailable);
        }

        let (balance, nonce) = chain
            .get_account_slices(&[tx.sender])
            .first()
            .map(|node| (node.balance, node.nonce))
            .unwrap_or((0, 0));
        let pending: Vec<&Transaction> = self
            .entries
            .values()
            .map(|e| &e.tx)
            .filter(|t| t.sender == tx.sender)
            .collect();

        let expected = nonce + pending.len() as u32;
        if tx.nonce != expected {
            return Err(MempoolError::NonceMismatch {
                address: tx.sender,
                expected,
                got: tx.nonce,
            });
        }
        let needed = pending
            .iter()
            .filter_map(|t| t.total_cost())
            .try_fold(cost, |acc, c| acc.checked_add(c))
            .ok_or_else(|| MempoolError::InvalidTransaction("value overflow".to_string()))?;
        if needed > balance {
            return Err(MempoolError::InsufficientFunds {
                address: tx.sender,
                balance,
                needed,
            });
        }

        // Evict low-fee transactions if at capacity
        while self.entries.len() >= self.max_size {
            match self.by_fee.last().copied() {
                Some(lowest) if self.entries.get(&lowest).map(|e| e.tx.fee) < Some(tx.fee) => {
                    self.remove_transaction(&lowest);
                }
                _ => return Err(MempoolError::MempoolFull),
            }
        }

        let pos = self
            .by_fee
            .iter()
            .position(|h| self.entries.get(h).map(|e| e.tx.fee).unwrap_or(0) < tx.fee)
            .unwrap_or(self.by_fee.len());
        self.by_fee.insert(pos, hash);

        let added_time = chrono::Utc::now().timestamp() as u64;
        self.entries.insert(hash, MempoolEntry::new(tx.clone(), added_time));

        log::debug!("Transaction {} added to mempool ({} pending)", hash, self.len());
        let _ = self.events.send(MempoolEvent::TransactionAdded(tx));
        Ok(())
    }

    /// Remove a transaction from the pool
    pub fn remove_transaction(&mut self, hash: &Hash) -> Option<Transaction> {
        let entry = self.entries.remove(hash)?;
        self.by_fee.retain(|h| h != hash);
        Some(entry.tx)
    }

    /// Drop transactions mined in `block` and any whose nonce is now stale
    pub fn evict_block(&mut self, block: &Block, chain: &BlockChain) {
        for tx in &block.body.transactions {
            self.remove_transaction(&tx.hash());
        }

        let stale: Vec<Hash> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                let nonce = chain
                    .get_account_slices(&[e.tx.sender])
                    .first()
                    .map(|n| n.nonce)
                    .unwrap_or(0);
                e.tx.nonce < nonce
            })
            .map(|(h, _)| *h)
            .collect();
        for hash in &stale {
            self.remove_transaction(hash);
        }

        let _ = self.events.send(MempoolEvent::TransactionsReady);
    }

    pub fn get_transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.entries.get(hash).map(|e| &e.tx)
    }

    /// Transactions for mining, highest fee first, keeping each sender's
    /// nonce order.
    pub fn get_transactions(&self, limit: usize) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self
            .by_fee
            .iter()
            .take(limit)
            .filter_map(|h| self.entries.get(h).map(|e| e.tx.clone()))
            .collect();
        txs.sort_by_key(|tx| (tx.sender, tx.nonce));
        txs
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_fee.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::blockchain::tests::{full_chain, mine};
    use crate::mining::Miner;

    fn funded_chain() -> (BlockChain, Address) {
        let mut chain = full_chain();
        mine(&mut chain, 1, "alice");
        (chain, Address::from_seed(b"alice"))
    }

    #[test]
    fn test_push_and_duplicate() {
        let (chain, alice) = funded_chain();
        let mut mempool = Mempool::new();
        let mut events = mempool.subscribe();
        let tx = Transaction::new(alice, Address::from_seed(b"bob"), 5, 1, 0);

        mempool.push_transaction(tx.clone(), &chain).unwrap();
        assert_eq!(mempool.len(), 1);
        assert_eq!(mempool.get_transaction(&tx.hash()), Some(&tx));
        assert_eq!(
            events.try_recv().unwrap(),
            MempoolEvent::TransactionAdded(tx.clone())
        );
        assert_eq!(
            mempool.push_transaction(tx, &chain),
            Err(MempoolError::DuplicateTransaction)
        );
    }

    #[test]
    fn test_rejects_nonce_gap_and_overspend() {
        let (chain, alice) = funded_chain();
        let bob = Address::from_seed(b"bob");
        let mut mempool = Mempool::new();

        assert!(matches!(
            mempool.push_transaction(Transaction::new(alice, bob, 5, 1, 1), &chain),
            Err(MempoolError::NonceMismatch { expected: 0, .. })
        ));

        mempool
            .push_transaction(Transaction::new(alice, bob, 30, 1, 0), &chain)
            .unwrap();
        assert!(matches!(
            mempool.push_transaction(Transaction::new(alice, bob, 30, 1, 1), &chain),
            Err(MempoolError::InsufficientFunds { needed: 62, .. })
        ));
        mempool
            .push_transaction(Transaction::new(alice, bob, 10, 1, 1), &chain)
            .unwrap();
        assert_eq!(mempool.len(), 2);
    }

    #[test]
    fn test_fee_order_and_capacity() {
        let mut chain = full_chain();
        mine(&mut chain, 1, "alice");
        mine(&mut chain, 1, "carol");
        let alice = Address::from_seed(b"alice");
        let carol = Address::from_seed(b"carol");
        let bob = Address::from_seed(b"bob");

        let mut mempool = Mempool::with_capacity(1);
        let cheap = Transaction::new(alice, bob, 5, 1, 0);
        let rich = Transaction::new(carol, bob, 5, 9, 0);
        mempool.push_transaction(cheap.clone(), &chain).unwrap();
        mempool.push_transaction(rich.clone(), &chain).unwrap();
        assert!(!mempool.contains(&cheap.hash()));
        assert_eq!(mempool.get_transactions(10), vec![rich]);
        assert_eq!(
            mempool.push_transaction(cheap, &chain),
            Err(MempoolError::MempoolFull)
        );
    }

    #[test]
    fn test_evict_mined_transactions() {
        let (mut chain, alice) = funded_chain();
        let mut mempool = Mempool::new();
        let tx = Transaction::new(alice, Address::from_seed(b"bob"), 5, 1, 0);
        mempool.push_transaction(tx.clone(), &chain).unwrap();

        let miner = Miner::new(Address::from_seed(b"carol"));
        let (block, _) = miner
            .mine_block(&mut chain, mempool.get_transactions(10))
            .unwrap();
        let mut events = mempool.subscribe();
        mempool.evict_block(&block, &chain);
        assert!(mempool.is_empty());
        assert_eq!(events.try_recv().unwrap(), MempoolEvent::TransactionsReady);
    }
}
