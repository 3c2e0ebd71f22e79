//! Network message types for P2P communication
//!
//! Every message travels in a fixed envelope:
//! `magic(4) ‖ type(u8) ‖ length(u32) ‖ checksum(4)` followed by the
//! payload, where the checksum is the first four bytes of SHA-256 over the
//! payload. Decoding validates the whole envelope before touching the
//! payload and never has side effects.

use crate::consensus::AccountsTreeNode;
use crate::core::serial::{read_list, read_u16, read_u32, write_list};
use crate::core::{Address, Block, BlockHeader, Decode, Encode, FormatError, InvVector, Transaction};
use crate::crypto::{sha256, Hash};
use bytes::{BufMut, Bytes, BytesMut};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x43, 0x53, 0x59, 0x4E]; // "CSYN"

/// Envelope size before the payload
pub const ENVELOPE_SIZE: usize = 4 + 1 + 4 + 4;

/// Largest accepted payload
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Inventory vectors per inv/getdata/notfound
pub const MAX_INV_VECTORS: usize = 1000;

/// Locator hashes per getblocks/getheaders
pub const MAX_LOCATORS: usize = 1000;

/// Headers per headers message, also the upper bound of `max_num`
pub const MAX_HEADERS: usize = 2000;

/// Nodes per accounts message and addresses per getaccounts
pub const MAX_ACCOUNTS_NODES: usize = 500;

const REVERSE_FLAG: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Version = 0,
    Inv = 1,
    GetData = 2,
    NotFound = 3,
    GetBlocks = 4,
    GetHeaders = 5,
    Block = 6,
    Headers = 7,
    Tx = 8,
    Mempool = 9,
    GetAccounts = 10,
    Accounts = 11,
}

impl TryFrom<u8> for MessageType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::Version,
            1 => MessageType::Inv,
            2 => MessageType::GetData,
            3 => MessageType::NotFound,
            4 => MessageType::GetBlocks,
            5 => MessageType::GetHeaders,
            6 => MessageType::Block,
            7 => MessageType::Headers,
            8 => MessageType::Tx,
            9 => MessageType::Mempool,
            10 => MessageType::GetAccounts,
            11 => MessageType::Accounts,
            other => return Err(FormatError::UnknownType(other)),
        })
    }
}

/// Network message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Initial handshake when connecting
    Version {
        version: u32,
        start_height: u32,
        head_hash: Hash,
    },
    /// Advertise objects
    Inv(Vec<InvVector>),
    /// Request objects
    GetData(Vec<InvVector>),
    /// Requested objects that are unknown to the responder
    NotFound(Vec<InvVector>),
    /// Request block inventory after the first known locator
    GetBlocks { locators: Vec<Hash>, hash_stop: Hash },
    /// Request headers after the first known locator
    GetHeaders {
        locators: Vec<Hash>,
        hash_stop: Hash,
        max_num: u16,
        reverse: bool,
    },
    Block(Block),
    Headers(Vec<BlockHeader>),
    Tx(Transaction),
    /// Request every mempool transaction
    Mempool,
    /// Request accounts slices; an empty address list asks for all of them
    GetAccounts { height: u32, addresses: Vec<Address> },
    /// Accounts slices at the responder's head height
    Accounts {
        height: u32,
        nodes: Vec<AccountsTreeNode>,
    },
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = sha256(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

fn check_bound<T>(items: &[T], max: usize, field: &'static str) -> Result<(), FormatError> {
    if items.len() > max {
        return Err(FormatError::MalformedField(field));
    }
    Ok(())
}

fn read_max_num_and_reverse(buf: &mut &[u8]) -> Result<(u16, bool), FormatError> {
    let word = read_u16(buf, "max_num")?;
    let max_num = word & !REVERSE_FLAG;
    if max_num == 0 || max_num as usize > MAX_HEADERS {
        return Err(FormatError::MalformedField("max_num"));
    }
    Ok((max_num, word & REVERSE_FLAG != 0))
}

/// Parse and check an envelope. Returns the message type and the full frame
/// length, or `None` if fewer than [`ENVELOPE_SIZE`] bytes are available.
pub fn peek_envelope(data: &[u8]) -> Result<Option<(MessageType, usize)>, FormatError> {
    if data.len() < ENVELOPE_SIZE {
        return Ok(None);
    }
    if data[..4] != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let kind = MessageType::try_from(data[4])?;
    let len = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FormatError::TooLarge(len, MAX_MESSAGE_SIZE));
    }
    Ok(Some((kind, ENVELOPE_SIZE + len)))
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Version { .. } => MessageType::Version,
            Message::Inv(_) => MessageType::Inv,
            Message::GetData(_) => MessageType::GetData,
            Message::NotFound(_) => MessageType::NotFound,
            Message::GetBlocks { .. } => MessageType::GetBlocks,
            Message::GetHeaders { .. } => MessageType::GetHeaders,
            Message::Block(_) => MessageType::Block,
            Message::Headers(_) => MessageType::Headers,
            Message::Tx(_) => MessageType::Tx,
            Message::Mempool => MessageType::Mempool,
            Message::GetAccounts { .. } => MessageType::GetAccounts,
            Message::Accounts { .. } => MessageType::Accounts,
        }
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Version { .. } => "version",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::NotFound(_) => "notfound",
            Message::GetBlocks { .. } => "getblocks",
            Message::GetHeaders { .. } => "getheaders",
            Message::Block(_) => "block",
            Message::Headers(_) => "headers",
            Message::Tx(_) => "tx",
            Message::Mempool => "mempool",
            Message::GetAccounts { .. } => "getaccounts",
            Message::Accounts { .. } => "accounts",
        }
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Message::Version {
                version,
                start_height,
                head_hash,
            } => {
                buf.put_u32(*version);
                buf.put_u32(*start_height);
                head_hash.encode(buf);
            }
            Message::Inv(vectors) | Message::GetData(vectors) | Message::NotFound(vectors) => {
                write_list(buf, vectors)
            }
            Message::GetBlocks {
                locators,
                hash_stop,
            } => {
                write_list(buf, locators);
                hash_stop.encode(buf);
            }
            Message::GetHeaders {
                locators,
                hash_stop,
                max_num,
                reverse,
            } => {
                write_list(buf, locators);
                hash_stop.encode(buf);
                let flag = if *reverse { REVERSE_FLAG } else { 0 };
                buf.put_u16((*max_num & !REVERSE_FLAG) | flag);
            }
            Message::Block(block) => block.encode(buf),
            Message::Headers(headers) => write_list(buf, headers),
            Message::Tx(tx) => tx.encode(buf),
            Message::Mempool => {}
            Message::GetAccounts { height, addresses } => {
                buf.put_u32(*height);
                write_list(buf, addresses);
            }
            Message::Accounts { height, nodes } => {
                buf.put_u32(*height);
                write_list(buf, nodes);
            }
        }
    }

    fn decode_payload(kind: MessageType, buf: &mut &[u8]) -> Result<Self, FormatError> {
        Ok(match kind {
            MessageType::Version => Message::Version {
                version: read_u32(buf, "version")?,
                start_height: read_u32(buf, "start_height")?,
                head_hash: Hash::decode(buf)?,
            },
            MessageType::Inv => Message::Inv(read_list(buf, MAX_INV_VECTORS, "inv")?),
            MessageType::GetData => Message::GetData(read_list(buf, MAX_INV_VECTORS, "getdata")?),
            MessageType::NotFound => {
                Message::NotFound(read_list(buf, MAX_INV_VECTORS, "notfound")?)
            }
            MessageType::GetBlocks => Message::GetBlocks {
                locators: read_list(buf, MAX_LOCATORS, "locators")?,
                hash_stop: Hash::decode(buf)?,
            },
            MessageType::GetHeaders => {
                let locators = read_list(buf, MAX_LOCATORS, "locators")?;
                let hash_stop = Hash::decode(buf)?;
                let (max_num, reverse) = read_max_num_and_reverse(buf)?;
                Message::GetHeaders {
                    locators,
                    hash_stop,
                    max_num,
                    reverse,
                }
            }
            MessageType::Block => Message::Block(Block::decode(buf)?),
            MessageType::Headers => Message::Headers(read_list(buf, MAX_HEADERS, "headers")?),
            MessageType::Tx => Message::Tx(Transaction::decode(buf)?),
            MessageType::Mempool => Message::Mempool,
            MessageType::GetAccounts => Message::GetAccounts {
                height: read_u32(buf, "height")?,
                addresses: read_list(buf, MAX_ACCOUNTS_NODES, "addresses")?,
            },
            MessageType::Accounts => Message::Accounts {
                height: read_u32(buf, "height")?,
                nodes: read_list(buf, MAX_ACCOUNTS_NODES, "accounts")?,
            },
        })
    }

    /// Check every counted field against its bound
    pub fn validate(&self) -> Result<(), FormatError> {
        match self {
            Message::Inv(v) | Message::GetData(v) | Message::NotFound(v) => {
                check_bound(v, MAX_INV_VECTORS, "inv")
            }
            Message::GetBlocks { locators, .. } => check_bound(locators, MAX_LOCATORS, "locators"),
            Message::GetHeaders {
                locators, max_num, ..
            } => {
                check_bound(locators, MAX_LOCATORS, "locators")?;
                if *max_num == 0 || *max_num as usize > MAX_HEADERS {
                    return Err(FormatError::MalformedField("max_num"));
                }
                Ok(())
            }
            Message::Headers(headers) => check_bound(headers, MAX_HEADERS, "headers"),
            Message::GetAccounts { addresses, .. } => {
                check_bound(addresses, MAX_ACCOUNTS_NODES, "addresses")
            }
            Message::Accounts { nodes, .. } => check_bound(nodes, MAX_ACCOUNTS_NODES, "accounts"),
            _ => Ok(()),
        }
    }

    /// Serialize into an enveloped frame
    pub fn serialize(&self) -> Bytes {
        let mut payload = BytesMut::new();
        self.encode_payload(&mut payload);

        let mut buf = BytesMut::with_capacity(ENVELOPE_SIZE + payload.len());
        buf.put_slice(&MAGIC);
        buf.put_u8(self.kind() as u8);
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&checksum(&payload));
        buf.put_slice(&payload);
        buf.freeze()
    }

    /// Parse exactly one enveloped frame
    pub fn deserialize(data: &[u8]) -> Result<Self, FormatError> {
        let (kind, frame_len) = peek_envelope(data)?.ok_or(FormatError::Truncated("envelope"))?;
        if data.len() < frame_len {
            return Err(FormatError::Truncated("payload"));
        }
        if data.len() > frame_len {
            return Err(FormatError::TrailingBytes(data.len() - frame_len));
        }

        let payload = &data[ENVELOPE_SIZE..];
        if data[9..ENVELOPE_SIZE] != checksum(payload) {
            return Err(FormatError::ChecksumMismatch);
        }

        let mut buf = payload;
        let message = Self::decode_payload(kind, &mut buf)?;
        if !buf.is_empty() {
            return Err(FormatError::TrailingBytes(buf.len()));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InvType;

    fn sample_header() -> BlockHeader {
        Block::genesis().header.clone()
    }

    #[test]
    fn test_envelope_layout() {
        let msg = Message::Mempool;
        let bytes = msg.serialize();
        assert_eq!(bytes.len(), ENVELOPE_SIZE);
        assert_eq!(&bytes[..4], &MAGIC);
        assert_eq!(bytes[4], MessageType::Mempool as u8);
        assert_eq!(&bytes[5..9], &[0, 0, 0, 0]);
        assert_eq!(Message::deserialize(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_messages_survive_the_wire() {
        let genesis = Block::genesis().clone();
        let messages = vec![
            Message::Inv(vec![
                InvVector::block(genesis.hash()),
                InvVector::new(InvType::Transaction, Hash::digest(b"tx")),
            ]),
            Message::GetHeaders {
                locators: vec![Hash::digest(b"a"), genesis.hash()],
                hash_stop: Hash::NULL,
                max_num: 500,
                reverse: true,
            },
            Message::Headers(vec![sample_header()]),
            Message::Block(genesis),
            Message::Accounts {
                height: 7,
                nodes: vec![AccountsTreeNode {
                    address: Address::from_seed(b"alice"),
                    balance: 50,
                    nonce: 2,
                }],
            },
        ];
        for msg in messages {
            assert_eq!(Message::deserialize(&msg.serialize()).unwrap(), msg);
        }
    }

    #[test]
    fn test_max_num_and_reverse_packing() {
        let msg = Message::GetHeaders {
            locators: vec![],
            hash_stop: Hash::NULL,
            max_num: 500,
            reverse: true,
        };
        let bytes = msg.serialize();
        let word = u16::from_be_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]);
        assert_eq!(word, 500 | 0x8000);
    }

    #[test]
    fn test_rejects_corruption() {
        let bytes = Message::Headers(vec![sample_header()]).serialize();

        let mut bad = bytes.to_vec();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        assert_eq!(Message::deserialize(&bad), Err(FormatError::ChecksumMismatch));

        let mut bad = bytes.to_vec();
        bad[0] = 0;
        assert_eq!(Message::deserialize(&bad), Err(FormatError::BadMagic));

        let mut bad = bytes.to_vec();
        bad[4] = 99;
        assert_eq!(Message::deserialize(&bad), Err(FormatError::UnknownType(99)));

        assert_eq!(
            Message::deserialize(&bytes[..bytes.len() - 1]),
            Err(FormatError::Truncated("payload"))
        );
    }

    fn frame(kind: MessageType, payload: &[u8]) -> Vec<u8> {
        let mut buf = MAGIC.to_vec();
        buf.push(kind as u8);
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&checksum(payload));
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_rejects_counts_above_bounds() {
        // 2001 headers claimed; rejected before any header is read
        let payload = 2001u16.to_be_bytes();
        assert_eq!(
            Message::deserialize(&frame(MessageType::Headers, &payload)),
            Err(FormatError::MalformedField("headers"))
        );

        let payload = 501u16.to_be_bytes();
        let mut accounts = 0u32.to_be_bytes().to_vec();
        accounts.extend_from_slice(&payload);
        assert_eq!(
            Message::deserialize(&frame(MessageType::Accounts, &accounts)),
            Err(FormatError::MalformedField("accounts"))
        );

        // max_num of zero
        let mut getheaders = 0u16.to_be_bytes().to_vec();
        getheaders.extend_from_slice(Hash::NULL.as_bytes());
        getheaders.extend_from_slice(&0x8000u16.to_be_bytes());
        assert_eq!(
            Message::deserialize(&frame(MessageType::GetHeaders, &getheaders)),
            Err(FormatError::MalformedField("max_num"))
        );
    }

    #[test]
    fn test_rejects_trailing_payload_bytes() {
        let mut payload = Message::Tx(Transaction::new(
            Address::from_seed(b"a"),
            Address::from_seed(b"b"),
            1,
            1,
            0,
        ))
        .serialize()[ENVELOPE_SIZE..]
            .to_vec();
        payload.push(0);
        assert_eq!(
            Message::deserialize(&frame(MessageType::Tx, &payload)),
            Err(FormatError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_validate_bounds() {
        let too_many = Message::Inv(vec![InvVector::block(Hash::NULL); MAX_INV_VECTORS + 1]);
        assert!(too_many.validate().is_err());
        assert!(Message::Mempool.validate().is_ok());
    }
}
