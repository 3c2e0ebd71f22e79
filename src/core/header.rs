//! Block headers
//!
//! A [`BlockHeader`] is immutable: its hash is computed once when it is
//! built and never changes. Mining works on a [`HeaderBuilder`], whose
//! nonce is freely mutable, and seals it into a header once a nonce
//! satisfying the proof of work is found.

use crate::core::serial::{read_u32, read_u64, Decode, Encode, FormatError};
use crate::crypto::{meets_difficulty, Hash};
use bytes::{BufMut, BytesMut};
use chrono::Utc;

/// Serialized header size in bytes
pub const HEADER_SIZE: usize = 3 * 32 + 4 + 8 + 8;

/// Current UNIX time in seconds
pub fn current_timestamp() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Header fields before sealing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBuilder {
    pub prev_hash: Hash,
    pub body_hash: Hash,
    pub accounts_hash: Hash,
    pub difficulty: u32,
    pub timestamp: u64,
    pub nonce: u64,
}

impl HeaderBuilder {
    fn write_fields(&self, buf: &mut BytesMut) {
        self.prev_hash.encode(buf);
        self.body_hash.encode(buf);
        self.accounts_hash.encode(buf);
        buf.put_u32(self.difficulty);
        buf.put_u64(self.timestamp);
        buf.put_u64(self.nonce);
    }

    /// Hash of the header with the current nonce
    pub fn hash(&self) -> Hash {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        self.write_fields(&mut buf);
        Hash::digest(&buf)
    }

    /// Freeze the fields into an immutable header
    pub fn seal(self) -> BlockHeader {
        let hash = self.hash();
        BlockHeader {
            fields: self,
            hash,
        }
    }

    /// Search nonces upward from the current one until the hash meets the
    /// declared difficulty. Returns the sealed header and the attempt count.
    pub fn mine(mut self) -> (BlockHeader, u64) {
        let mut attempts = 1u64;
        loop {
            let hash = self.hash();
            if meets_difficulty(hash.as_bytes(), self.difficulty) {
                return (
                    BlockHeader {
                        fields: self,
                        hash,
                    },
                    attempts,
                );
            }
            self.nonce = self.nonce.wrapping_add(1);
            attempts += 1;
        }
    }
}

/// Immutable block header with its cached hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    fields: HeaderBuilder,
    hash: Hash,
}

impl BlockHeader {
    pub fn new(
        prev_hash: Hash,
        body_hash: Hash,
        accounts_hash: Hash,
        difficulty: u32,
        timestamp: u64,
        nonce: u64,
    ) -> Self {
        HeaderBuilder {
            prev_hash,
            body_hash,
            accounts_hash,
            difficulty,
            timestamp,
            nonce,
        }
        .seal()
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn prev_hash(&self) -> Hash {
        self.fields.prev_hash
    }

    pub fn body_hash(&self) -> Hash {
        self.fields.body_hash
    }

    pub fn accounts_hash(&self) -> Hash {
        self.fields.accounts_hash
    }

    /// Required number of leading zero bits
    pub fn difficulty(&self) -> u32 {
        self.fields.difficulty
    }

    pub fn timestamp(&self) -> u64 {
        self.fields.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.fields.nonce
    }

    /// Check the hash against the header's own difficulty
    pub fn is_proof_of_work(&self) -> bool {
        meets_difficulty(self.hash.as_bytes(), self.fields.difficulty)
    }

    /// Copy the fields back into a builder for re-mining
    pub fn to_builder(&self) -> HeaderBuilder {
        self.fields.clone()
    }
}

impl Encode for BlockHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.fields.write_fields(buf);
    }
}

impl Decode for BlockHeader {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        Ok(HeaderBuilder {
            prev_hash: Hash::decode(buf)?,
            body_hash: Hash::decode(buf)?,
            accounts_hash: Hash::decode(buf)?,
            difficulty: read_u32(buf, "difficulty")?,
            timestamp: read_u64(buf, "timestamp")?,
            nonce: read_u64(buf, "nonce")?,
        }
        .seal())
    }
}
