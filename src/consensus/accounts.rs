//! Accounts ledger
//!
//! The chain only needs a small amount from its accounts state: a hash to
//! compare against `accounts_hash` in headers, the ability to apply and
//! revert block bodies, and slices that light clients can download. The
//! [`Accounts`] trait is that boundary; [`MemoryAccounts`] is a plain
//! transfer ledger behind it.

use crate::core::serial::{read_u32, read_u64, Decode, Encode, FormatError};
use crate::core::{Address, BlockBody, BLOCK_REWARD};
use crate::crypto::Hash;
use bytes::{BufMut, BytesMut};
use std::collections::BTreeMap;
use thiserror::Error;

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountsError {
    #[error("Insufficient funds in {address}: balance {balance}, needed {needed}")]
    InsufficientFunds {
        address: Address,
        balance: u64,
        needed: u64,
    },
    #[error("Nonce mismatch for {address}: expected {expected}, got {got}")]
    NonceMismatch {
        address: Address,
        expected: u32,
        got: u32,
    },
    #[error("Balance overflow for {0}")]
    Overflow(Address),
    #[error("Duplicate account node for {0}")]
    DuplicateNode(Address),
}

/// One account as shipped in an accounts slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountsTreeNode {
    pub address: Address,
    pub balance: u64,
    pub nonce: u32,
}

impl Encode for AccountsTreeNode {
    fn encode(&self, buf: &mut BytesMut) {
        self.address.encode(buf);
        buf.put_u64(self.balance);
        buf.put_u32(self.nonce);
    }
}

impl Decode for AccountsTreeNode {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        Ok(Self {
            address: Address::decode(buf)?,
            balance: read_u64(buf, "account balance")?,
            nonce: read_u32(buf, "account nonce")?,
        })
    }
}

/// Accounts state consumed by the chain
pub trait Accounts: Send + Sync {
    /// Hash over the complete state
    fn hash(&self) -> Hash;

    /// Apply a block body. On error the state is unchanged.
    fn apply_block(&mut self, body: &BlockBody) -> Result<(), AccountsError>;

    /// Undo a previously applied block body. On error the state is unchanged.
    fn revert_block(&mut self, body: &BlockBody) -> Result<(), AccountsError>;

    /// Addresses holding state
    fn used_addresses(&self) -> Vec<Address>;

    /// Nodes for the given addresses; an empty list selects every account.
    fn slices(&self, addresses: &[Address]) -> Vec<AccountsTreeNode>;

    /// Insert downloaded nodes
    fn populate(&mut self, nodes: &[AccountsTreeNode]) -> Result<(), AccountsError>;

    fn clear(&mut self);

    /// Independent copy that can be mutated without touching this one
    fn fork(&self) -> Box<dyn Accounts>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Account {
    balance: u64,
    nonce: u32,
}

impl Account {
    fn is_empty(&self) -> bool {
        self.balance == 0 && self.nonce == 0
    }
}

/// In-memory transfer ledger
#[derive(Debug, Clone, Default)]
pub struct MemoryAccounts {
    accounts: BTreeMap<Address, Account>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    pub fn nonce(&self, address: &Address) -> u32 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn credit(
        accounts: &mut BTreeMap<Address, Account>,
        address: Address,
        amount: u64,
    ) -> Result<(), AccountsError> {
        let account = accounts.entry(address).or_default();
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(AccountsError::Overflow(address))?;
        Ok(())
    }

    fn debit(
        accounts: &mut BTreeMap<Address, Account>,
        address: Address,
        amount: u64,
    ) -> Result<(), AccountsError> {
        let account = accounts.entry(address).or_default();
        if account.balance < amount {
            return Err(AccountsError::InsufficientFunds {
                address,
                balance: account.balance,
                needed: amount,
            });
        }
        account.balance -= amount;
        Ok(())
    }

    fn miner_reward(body: &BlockBody) -> Result<u64, AccountsError> {
        body.total_fees()
            .and_then(|fees| fees.checked_add(BLOCK_REWARD))
            .ok_or(AccountsError::Overflow(body.miner))
    }

    fn prune(accounts: &mut BTreeMap<Address, Account>) {
        accounts.retain(|_, account| !account.is_empty());
    }
}

impl Accounts for MemoryAccounts {
    fn hash(&self) -> Hash {
        let mut buf = BytesMut::with_capacity(self.accounts.len() * 32);
        for node in self.slices(&[]) {
            node.encode(&mut buf);
        }
        Hash::digest(&buf)
    }

    fn apply_block(&mut self, body: &BlockBody) -> Result<(), AccountsError> {
        let mut next = self.accounts.clone();

        for tx in &body.transactions {
            let cost = tx.total_cost().ok_or(AccountsError::Overflow(tx.sender))?;
            let nonce = next.get(&tx.sender).map(|a| a.nonce).unwrap_or(0);
            if nonce != tx.nonce {
                return Err(AccountsError::NonceMismatch {
                    address: tx.sender,
                    expected: nonce,
                    got: tx.nonce,
                });
            }
            Self::debit(&mut next, tx.sender, cost)?;
            next.entry(tx.sender).or_default().nonce += 1;
            Self::credit(&mut next, tx.recipient, tx.value)?;
        }
        Self::credit(&mut next, body.miner, Self::miner_reward(body)?)?;

        Self::prune(&mut next);
        self.accounts = next;
        Ok(())
    }

    fn revert_block(&mut self, body: &BlockBody) -> Result<(), AccountsError> {
        let mut next = self.accounts.clone();

        Self::debit(&mut next, body.miner, Self::miner_reward(body)?)?;
        for tx in body.transactions.iter().rev() {
            let cost = tx.total_cost().ok_or(AccountsError::Overflow(tx.sender))?;
            Self::debit(&mut next, tx.recipient, tx.value)?;
            let sender = next.entry(tx.sender).or_default();
            if sender.nonce != tx.nonce.wrapping_add(1) {
                return Err(AccountsError::NonceMismatch {
                    address: tx.sender,
                    expected: sender.nonce,
                    got: tx.nonce.wrapping_add(1),
                });
            }
            sender.nonce -= 1;
            Self::credit(&mut next, tx.sender, cost)?;
        }

        Self::prune(&mut next);
        self.accounts = next;
        Ok(())
    }

    fn used_addresses(&self) -> Vec<Address> {
        self.accounts.keys().copied().collect()
    }

    fn slices(&self, addresses: &[Address]) -> Vec<AccountsTreeNode> {
        let node = |address: &Address, account: &Account| AccountsTreeNode {
            address: *address,
            balance: account.balance,
            nonce: account.nonce,
        };
        if addresses.is_empty() {
            return self.accounts.iter().map(|(a, acc)| node(a, acc)).collect();
        }
        addresses
            .iter()
            .filter_map(|a| self.accounts.get(a).map(|acc| node(a, acc)))
            .collect()
    }

    fn populate(&mut self, nodes: &[AccountsTreeNode]) -> Result<(), AccountsError> {
        let mut next = self.accounts.clone();
        for node in nodes {
            let account = Account {
                balance: node.balance,
                nonce: node.nonce,
            };
            if next.insert(node.address, account).is_some() {
                return Err(AccountsError::DuplicateNode(node.address));
            }
        }
        Self::prune(&mut next);
        self.accounts = next;
        Ok(())
    }

    fn clear(&mut self) {
        self.accounts.clear();
    }

    fn fork(&self) -> Box<dyn Accounts> {
        Box::new(self.clone())
    }
}
