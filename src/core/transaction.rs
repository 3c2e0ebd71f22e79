//! Transaction handling for the blockchain
//!
//! Transactions are plain value transfers between account addresses.
//! Signature and policy checks live with the mempool; the chain only
//! cares about structure and the effect on the accounts ledger.

use crate::core::serial::{read_array, read_u32, read_u64, Decode, Encode, FormatError};
use crate::crypto::Hash;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Size of an account address in bytes
pub const ADDRESS_SIZE: usize = 20;

/// Serialized size of a transaction
pub const TRANSACTION_SIZE: usize = 2 * ADDRESS_SIZE + 8 + 8 + 4;

/// An account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive an address from arbitrary seed bytes (first 20 bytes of SHA-256).
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut out = [0u8; ADDRESS_SIZE];
        out.copy_from_slice(&Hash::digest(seed).as_bytes()[..ADDRESS_SIZE]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0u8; ADDRESS_SIZE];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Encode for Address {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl Decode for Address {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        Ok(Self(read_array(buf, "address")?))
    }
}

/// A value transfer between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Paying account
    pub sender: Address,
    /// Receiving account
    pub recipient: Address,
    /// Amount moved to the recipient
    pub value: u64,
    /// Amount paid to the block's miner
    pub fee: u64,
    /// Sender's transaction counter
    pub nonce: u32,
}

impl Transaction {
    pub fn new(sender: Address, recipient: Address, value: u64, fee: u64, nonce: u32) -> Self {
        Self {
            sender,
            recipient,
            value,
            fee,
            nonce,
        }
    }

    /// Content hash of the serialized transaction
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.to_bytes())
    }

    /// Total amount debited from the sender
    pub fn total_cost(&self) -> Option<u64> {
        self.value.checked_add(self.fee)
    }
}

impl Encode for Transaction {
    fn encode(&self, buf: &mut BytesMut) {
        self.sender.encode(buf);
        self.recipient.encode(buf);
        buf.put_u64(self.value);
        buf.put_u64(self.fee);
        buf.put_u32(self.nonce);
    }
}

impl Decode for Transaction {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        Ok(Self {
            sender: Address::decode(buf)?,
            recipient: Address::decode(buf)?,
            value: read_u64(buf, "transaction value")?,
            fee: read_u64(buf, "transaction fee")?,
            nonce: read_u32(buf, "transaction nonce")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_layout() {
        let tx = Transaction::new(
            Address::from_seed(b"alice"),
            Address::from_seed(b"bob"),
            100,
            1,
            0,
        );
        let bytes = tx.to_bytes();
        assert_eq!(bytes.len(), TRANSACTION_SIZE);
        assert_eq!(Transaction::from_bytes(&bytes).unwrap(), tx);
        assert_eq!(tx.hash(), Hash::digest(&bytes));
    }

    #[test]
    fn test_total_cost_overflow() {
        let tx = Transaction::new(Address::default(), Address::default(), u64::MAX, 1, 0);
        assert_eq!(tx.total_cost(), None);
    }

    #[test]
    fn test_address_hex() {
        let addr = Address::from_seed(b"miner");
        assert_eq!(Address::from_hex(&addr.to_hex()).unwrap(), addr);
        assert_eq!(addr.to_string().len(), 40);
    }
}
