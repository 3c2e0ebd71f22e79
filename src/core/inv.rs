//! Inventory vectors
//!
//! An inventory vector names an object by kind and hash so that peers can
//! advertise and request objects without sending them.

use crate::core::serial::{read_u8, Decode, Encode, FormatError};
use crate::crypto::Hash;
use bytes::{BufMut, BytesMut};

/// Kind of object an inventory vector points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    Transaction = 1,
    Block = 2,
}

impl TryFrom<u8> for InvType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(InvType::Transaction),
            2 => Ok(InvType::Block),
            _ => Err(FormatError::MalformedField("inventory type")),
        }
    }
}

/// Typed reference to a block or transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvVector {
    pub kind: InvType,
    pub hash: Hash,
}

impl InvVector {
    pub fn new(kind: InvType, hash: Hash) -> Self {
        Self { kind, hash }
    }

    pub fn block(hash: Hash) -> Self {
        Self::new(InvType::Block, hash)
    }

    pub fn transaction(hash: Hash) -> Self {
        Self::new(InvType::Transaction, hash)
    }
}

impl Encode for InvVector {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind as u8);
        self.hash.encode(buf);
    }
}

impl Decode for InvVector {
    fn decode(buf: &mut &[u8]) -> Result<Self, FormatError> {
        let kind = InvType::try_from(read_u8(buf, "inventory type")?)?;
        Ok(Self::new(kind, Hash::decode(buf)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_covers_kind() {
        let hash = Hash::digest(b"obj");
        assert_eq!(InvVector::block(hash), InvVector::block(hash));
        assert_ne!(InvVector::block(hash), InvVector::transaction(hash));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = InvVector::block(Hash::NULL).to_bytes().to_vec();
        bytes[0] = 9;
        assert_eq!(
            InvVector::from_bytes(&bytes),
            Err(FormatError::MalformedField("inventory type"))
        );
    }
}
