//! Peer handles
//!
//! A [`PeerChannel`] is the outbound half of a connection as seen by a sync
//! agent: one method per message type plus `close` and `ban`. Commands are
//! queued on an mpsc and drained by the transport.

use crate::consensus::AccountsTreeNode;
use crate::core::{Address, Block, BlockHeader, InvVector, Transaction};
use crate::crypto::Hash;
use crate::network::message::Message;
use tokio::sync::mpsc;

/// Commands consumed by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    Send(Message),
    /// Disconnect without penalty
    Close(String),
    /// Disconnect and refuse the address from now on
    Ban(String),
}

/// Outbound handle for one peer
#[derive(Debug, Clone)]
pub struct PeerChannel {
    tx: mpsc::UnboundedSender<ChannelCommand>,
}

impl PeerChannel {
    pub fn new(tx: mpsc::UnboundedSender<ChannelCommand>) -> Self {
        Self { tx }
    }

    /// Channel plus the receiving end the transport drains
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<ChannelCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn command(&self, command: ChannelCommand) {
        if self.tx.send(command).is_err() {
            log::debug!("Peer channel already closed");
        }
    }

    pub fn send(&self, message: Message) {
        self.command(ChannelCommand::Send(message));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn inv(&self, vectors: Vec<InvVector>) {
        self.send(Message::Inv(vectors));
    }

    pub fn get_data(&self, vectors: Vec<InvVector>) {
        self.send(Message::GetData(vectors));
    }

    pub fn not_found(&self, vectors: Vec<InvVector>) {
        self.send(Message::NotFound(vectors));
    }

    pub fn get_blocks(&self, locators: Vec<Hash>, hash_stop: Hash) {
        self.send(Message::GetBlocks {
            locators,
            hash_stop,
        });
    }

    pub fn get_headers(&self, locators: Vec<Hash>, hash_stop: Hash, max_num: u16, reverse: bool) {
        self.send(Message::GetHeaders {
            locators,
            hash_stop,
            max_num,
            reverse,
        });
    }

    pub fn block(&self, block: Block) {
        self.send(Message::Block(block));
    }

    pub fn headers(&self, headers: Vec<BlockHeader>) {
        self.send(Message::Headers(headers));
    }

    pub fn tx(&self, transaction: Transaction) {
        self.send(Message::Tx(transaction));
    }

    pub fn mempool(&self) {
        self.send(Message::Mempool);
    }

    pub fn get_accounts(&self, height: u32, addresses: Vec<Address>) {
        self.send(Message::GetAccounts { height, addresses });
    }

    pub fn accounts(&self, height: u32, nodes: Vec<AccountsTreeNode>) {
        self.send(Message::Accounts { height, nodes });
    }

    pub fn close(&self, reason: impl Into<String>) {
        self.command(ChannelCommand::Close(reason.into()));
    }

    pub fn ban(&self, reason: impl Into<String>) {
        self.command(ChannelCommand::Ban(reason.into()));
    }
}

/// A connected peer as announced in its version message
#[derive(Debug, Clone)]
pub struct Peer {
    pub channel: PeerChannel,
    /// Remote address, for logging
    pub address: String,
    /// Chain height the peer advertised when connecting
    pub start_height: u32,
    pub head_hash: Hash,
}

impl Peer {
    pub fn new(channel: PeerChannel, address: impl Into<String>, start_height: u32, head_hash: Hash) -> Self {
        Self {
            channel,
            address: address.into(),
            start_height,
            head_hash,
        }
    }
}
