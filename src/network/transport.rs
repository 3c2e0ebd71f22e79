//! TCP connection handling
//!
//! Each connection exchanges a version message, then hands the stream to a
//! [`PeerSyncAgent`]. A reader forwards decoded frames to the agent and a
//! writer task drains the agent's [`PeerChannel`] commands into the socket.

use crate::config::{ClientMode, ConsensusConfig};
use crate::consensus::{BlockChain, PeerSyncAgent};
use crate::crypto::Hash;
use crate::mining::Mempool;
use crate::network::codec::{CodecError, MessageCodec};
use crate::network::message::{Message, PROTOCOL_VERSION};
use crate::network::peer::{ChannelCommand, Peer, PeerChannel};
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_util::codec::Framed;

/// How long the remote side has to answer with its version
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type FrameSink = SplitSink<Framed<TcpStream, MessageCodec>, Message>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Handshake timed out")]
    Timeout,
    #[error("Peer {0} is banned")]
    Banned(IpAddr),
}

/// State shared by every connection of a node
pub struct NodeContext {
    pub chain: Arc<RwLock<BlockChain>>,
    pub mempool: Arc<RwLock<Mempool>>,
    pub mode: ClientMode,
    pub consensus: ConsensusConfig,
    banned: RwLock<HashSet<IpAddr>>,
    peers: RwLock<HashSet<SocketAddr>>,
}

impl NodeContext {
    pub fn new(
        chain: BlockChain,
        mempool: Mempool,
        consensus: ConsensusConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            mode: chain.mode(),
            chain: Arc::new(RwLock::new(chain)),
            mempool: Arc::new(RwLock::new(mempool)),
            consensus,
            banned: RwLock::new(HashSet::new()),
            peers: RwLock::new(HashSet::new()),
        })
    }

    pub async fn is_banned(&self, ip: IpAddr) -> bool {
        self.banned.read().await.contains(&ip)
    }

    pub async fn ban(&self, ip: IpAddr) {
        self.banned.write().await.insert(ip);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}

/// Bind `addr` and serve connections until the listener fails
pub async fn listen(addr: &str, ctx: Arc<NodeContext>) -> Result<(), TransportError> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    serve(listener, ctx).await
}

pub async fn serve(listener: TcpListener, ctx: Arc<NodeContext>) -> Result<(), TransportError> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, ctx).await {
                log::warn!("Connection with {} failed: {}", addr, e);
            }
        });
    }
}

/// Connect to a peer and run the connection to completion
pub async fn connect(addr: &str, ctx: Arc<NodeContext>) -> Result<(), TransportError> {
    let stream = TcpStream::connect(addr).await?;
    let peer_addr = stream.peer_addr()?;
    handle_connection(stream, peer_addr, ctx).await
}

/// Handle a peer connection (both inbound and outbound)
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<NodeContext>,
) -> Result<(), TransportError> {
    if ctx.is_banned(addr.ip()).await {
        return Err(TransportError::Banned(addr.ip()));
    }

    let mut framed = Framed::new(stream, MessageCodec);
    let ours = {
        let chain = ctx.chain.read().await;
        Message::Version {
            version: PROTOCOL_VERSION,
            start_height: chain.height(),
            head_hash: chain.head_hash(),
        }
    };
    let (start_height, head_hash) = handshake(&mut framed, ours).await?;
    ctx.peers.write().await.insert(addr);
    log::info!(
        "Connected to {} (height {}, {} peers)",
        addr,
        start_height,
        ctx.peer_count().await
    );

    let (channel, commands_rx) = PeerChannel::pair();
    let peer = Peer::new(channel, addr.to_string(), start_height, head_hash);
    let agent = PeerSyncAgent::new(
        peer,
        ctx.chain.clone(),
        ctx.mempool.clone(),
        ctx.mode,
        ctx.consensus.clone(),
    );

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let (writer, mut reader) = framed.split();
    let mut writer_task = tokio::spawn(write_commands(writer, commands_rx, addr, ctx.clone()));
    let agent_task = tokio::spawn(agent.run(inbound_rx));

    let mut writer_done = false;
    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(message)) => {
                    if inbound_tx.send(Ok(message)).is_err() {
                        break;
                    }
                }
                Some(Err(CodecError::Format(e))) => {
                    // The stream cannot be resynchronized; let the agent judge
                    let _ = inbound_tx.send(Err(e));
                    break;
                }
                Some(Err(CodecError::Io(e))) => {
                    log::warn!("Error reading from {}: {}", addr, e);
                    break;
                }
                None => {
                    log::info!("Peer {} disconnected", addr);
                    break;
                }
            },
            _ = &mut writer_task => {
                writer_done = true;
                break;
            }
        }
    }

    // Cleanup
    drop(inbound_tx);
    let _ = agent_task.await;
    if !writer_done {
        let _ = writer_task.await;
    }
    ctx.peers.write().await.remove(&addr);

    Ok(())
}

async fn handshake(
    framed: &mut Framed<TcpStream, MessageCodec>,
    ours: Message,
) -> Result<(u32, Hash), TransportError> {
    framed.send(ours).await?;

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Err(_) => Err(TransportError::Timeout),
        Ok(None) => Err(TransportError::Handshake("connection closed".to_string())),
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(Some(Ok(Message::Version {
            version,
            start_height,
            head_hash,
        }))) => {
            if version != PROTOCOL_VERSION {
                return Err(TransportError::Handshake(format!(
                    "unsupported protocol version {}",
                    version
                )));
            }
            Ok((start_height, head_hash))
        }
        Ok(Some(Ok(other))) => Err(TransportError::Handshake(format!(
            "expected version, got {}",
            other.type_name()
        ))),
    }
}

async fn write_commands(
    mut writer: FrameSink,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    addr: SocketAddr,
    ctx: Arc<NodeContext>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            ChannelCommand::Send(message) => {
                if let Err(e) = writer.send(message).await {
                    log::warn!("Error writing to {}: {}", addr, e);
                    break;
                }
            }
            ChannelCommand::Close(reason) => {
                log::info!("Disconnecting {}: {}", addr, reason);
                break;
            }
            ChannelCommand::Ban(reason) => {
                log::warn!("Banning {}: {}", addr, reason);
                ctx.ban(addr.ip()).await;
                break;
            }
        }
    }
    let _ = writer.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainPolicy;
    use crate::consensus::blockchain::tests::mine;

    fn context(blocks: usize) -> Arc<NodeContext> {
        let mut chain = BlockChain::volatile(ClientMode::Full, ChainPolicy::default()).unwrap();
        mine(&mut chain, blocks, "bob");
        NodeContext::new(chain, Mempool::new(), ConsensusConfig::default())
    }

    async fn wait_for_height(ctx: &NodeContext, height: u32) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        while ctx.chain.read().await.height() < height {
            assert!(tokio::time::Instant::now() < deadline, "sync timed out");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_sync_over_tcp() {
        let remote = context(5);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, remote.clone()));

        let local = context(0);
        let dial = local.clone();
        let connection = tokio::spawn(async move { connect(&addr.to_string(), dial).await });
        wait_for_height(&local, 6).await;

        assert_eq!(
            local.chain.read().await.head_hash(),
            remote.chain.read().await.head_hash()
        );
        assert_eq!(local.peer_count().await, 1);
        connection.abort();
    }

    #[tokio::test]
    async fn test_banned_peer_is_refused() {
        let ctx = context(0);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        ctx.ban(addr.ip()).await;

        let result = connect(&addr.to_string(), ctx).await;
        assert!(matches!(result, Err(TransportError::Banned(_))));
    }

    #[tokio::test]
    async fn test_handshake_requires_version() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, MessageCodec);
            framed.send(Message::Mempool).await.unwrap();
            let _ = framed.next().await;
        });

        let result = connect(&addr.to_string(), context(0)).await;
        assert!(matches!(result, Err(TransportError::Handshake(_))));
    }
}
