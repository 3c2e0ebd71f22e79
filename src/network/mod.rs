//! P2P Networking module
//!
//! # Features
//! - Checksummed binary envelope framing
//! - Version handshake over TCP
//! - One sync agent per connection
//! - Address banning

pub mod codec;
pub mod message;
pub mod peer;
pub mod transport;

pub use codec::{CodecError, MessageCodec};
pub use message::{
    Message, MessageType, MAGIC, MAX_ACCOUNTS_NODES, MAX_HEADERS, MAX_INV_VECTORS,
    MAX_LOCATORS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use peer::{ChannelCommand, Peer, PeerChannel};
pub use transport::{connect, handle_connection, listen, serve, NodeContext, TransportError};
