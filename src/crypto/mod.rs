//! Cryptographic utilities for the blockchain
//!
//! This module provides:
//! - SHA-256 content addressing
//! - The leading-zero-bits proof-of-work predicate

pub mod hash;

pub use hash::{meets_difficulty, sha256, sha256_hex, Hash, HASH_SIZE};
