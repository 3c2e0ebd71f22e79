//! Per-peer chain synchronization
//!
//! A [`PeerSyncAgent`] drives one connection through `Idle -> Syncing ->
//! Synced`. Full clients walk the peer's block inventory; light clients
//! fetch the peer's most recent headers, the newest blocks on top of them
//! and an accounts snapshot that is checked by replaying those blocks
//! backwards.
//!
//! The agent runs as a single task. Inbound messages, timer firings, and
//! chain and mempool events are multiplexed with
//! `tokio::select!`, so no two handlers for the same peer overlap. The
//! chain is shared with other agents, so every handler re-reads what it
//! needs after acquiring the lock.

use crate::config::{ClientMode, ConsensusConfig};
use crate::consensus::accounts::AccountsTreeNode;
use crate::consensus::blockchain::{BlockChain, ChainEvent, PushResult};
use crate::consensus::error::ChainError;
use crate::consensus::inventory::{InventoryExchange, QueueAction, ReceiveOutcome};
use crate::consensus::timers::{TimerFired, TimerKind, Timers};
use crate::core::{Address, Block, BlockHeader, FormatError, InvType, InvVector, Transaction};
use crate::crypto::Hash;
use crate::mining::{Mempool, MempoolEvent};
use crate::network::message::{Message, MAX_ACCOUNTS_NODES, MAX_HEADERS, MAX_INV_VECTORS};
use crate::network::peer::Peer;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Decoded message or the reason it could not be decoded
pub type Inbound = Result<Message, FormatError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
}

/// Notifications for the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Consensus with the peer established
    Synced,
    Closed { reason: String, banned: bool },
}

enum AccountsOutcome {
    Verified,
    /// Snapshot did not fit our head; counts as a failed sync round
    Retry(&'static str),
    /// Replay disagreed with the recorded accounts hashes
    Mismatch,
}

pub struct PeerSyncAgent {
    peer: Peer,
    chain: Arc<RwLock<BlockChain>>,
    mempool: Arc<RwLock<Mempool>>,
    mode: ClientMode,
    config: ConsensusConfig,
    state: SyncState,
    inventory: InventoryExchange,
    timers: Timers,
    timer_rx: Option<mpsc::UnboundedReceiver<TimerFired>>,
    /// Local height when the last sync request went out
    last_sync_height: Option<u32>,
    failed_syncs: u32,
    blocks_received: u32,
    waiting_for_chain: bool,
    closed: bool,
    events: broadcast::Sender<AgentEvent>,
}

impl PeerSyncAgent {
    pub fn new(
        peer: Peer,
        chain: Arc<RwLock<BlockChain>>,
        mempool: Arc<RwLock<Mempool>>,
        mode: ClientMode,
        config: ConsensusConfig,
    ) -> Self {
        let (timers, timer_rx) = Timers::new();
        let (events, _) = broadcast::channel(16);
        Self {
            inventory: InventoryExchange::new(config.request_threshold),
            peer,
            chain,
            mempool,
            mode,
            config,
            state: SyncState::Idle,
            timers,
            timer_rx: Some(timer_rx),
            last_sync_height: None,
            failed_syncs: 0,
            blocks_received: 0,
            waiting_for_chain: false,
            closed: false,
            events,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Sync with the peer and serve its requests until the connection ends
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        let Some(mut timer_rx) = self.timer_rx.take() else {
            return;
        };
        let mut chain_events = self.chain.read().await.subscribe();
        let mut mempool_events = self.mempool.read().await.subscribe();

        log::info!(
            "Starting sync with {} (advertised height {})",
            self.peer.address,
            self.peer.start_height
        );
        self.sync_blockchain().await;

        while !self.closed {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(Ok(message)) => self.handle_message(message).await,
                    Some(Err(e)) => self.ban(format!("malformed message: {}", e)),
                    None => self.close("connection closed"),
                },
                Some(fired) = timer_rx.recv() => {
                    if self.timers.accept(fired) {
                        self.on_timer(fired.0).await;
                    }
                }
                event = chain_events.recv() => match event {
                    Ok(event) => self.on_chain_event(event).await,
                    Err(RecvError::Lagged(n)) => log::debug!("Missed {} chain events", n),
                    Err(RecvError::Closed) => self.close("chain shut down"),
                },
                event = mempool_events.recv() => match event {
                    Ok(MempoolEvent::TransactionAdded(tx)) => self.relay_transaction(&tx),
                    Ok(MempoolEvent::TransactionsReady) => {}
                    Err(RecvError::Lagged(n)) => log::debug!("Missed {} mempool events", n),
                    Err(RecvError::Closed) => self.close("mempool shut down"),
                },
            }
        }

        self.timers.clear_all();
    }

    async fn handle_message(&mut self, message: Message) {
        if self.closed {
            return;
        }
        match message {
            Message::Version { .. } => {
                log::debug!("Ignoring repeated version from {}", self.peer.address)
            }
            Message::Inv(vectors) => self.on_inv(vectors).await,
            Message::GetData(vectors) => self.on_get_data(vectors).await,
            Message::NotFound(vectors) => self.on_not_found(vectors).await,
            Message::GetBlocks {
                locators,
                hash_stop,
            } => self.on_get_blocks(&locators, &hash_stop).await,
            Message::GetHeaders {
                locators,
                hash_stop,
                max_num,
                reverse,
            } => {
                self.on_get_headers(&locators, &hash_stop, max_num, reverse)
                    .await
            }
            Message::Block(block) => self.on_block(block).await,
            Message::Headers(headers) => self.on_headers(headers).await,
            Message::Tx(tx) => self.on_tx(tx).await,
            Message::Mempool => self.on_mempool().await,
            Message::GetAccounts { height, addresses } => {
                self.on_get_accounts(height, &addresses).await
            }
            Message::Accounts { height, nodes } => self.on_accounts(height, nodes).await,
        }
    }

    // =========================================================================
    // Sync driver
    // =========================================================================

    async fn sync_blockchain(&mut self) {
        if self.closed {
            return;
        }
        self.state = SyncState::Syncing;

        let (height, accounts_complete) = match self.chain.try_read() {
            Ok(chain) => (chain.height(), chain.accounts_complete()),
            Err(_) => {
                log::debug!("Chain busy, waiting ...");
                self.waiting_for_chain = true;
                return;
            }
        };

        if self.last_sync_height == Some(height) {
            // The last round brought no progress
            self.failed_syncs += 1;
            if self.failed_syncs < self.config.max_sync_attempts {
                log::debug!(
                    "No progress syncing with {} (attempt {})",
                    self.peer.address,
                    self.failed_syncs
                );
                self.request().await;
            } else {
                self.ban("blockchain sync failed");
            }
        } else if height < self.peer.start_height {
            self.last_sync_height = Some(height);
            self.request().await;
        } else if height > self.peer.start_height {
            log::debug!(
                "Peer {} has a shorter chain ({}) than us ({})",
                self.peer.address,
                self.peer.start_height,
                height
            );
            self.set_synced();
        } else if self.mode == ClientMode::Mini && !accounts_complete {
            self.request_accounts().await;
        } else {
            self.set_synced();
        }
    }

    fn set_synced(&mut self) {
        self.state = SyncState::Synced;
        self.waiting_for_chain = false;
        log::info!("Synced with {}", self.peer.address);
        let _ = self.events.send(AgentEvent::Synced);
    }

    async fn request(&mut self) {
        match self.mode {
            ClientMode::Full => self.request_blocks().await,
            ClientMode::Mini => self.request_headers().await,
        }
    }

    async fn request_blocks(&mut self) {
        if self.timers.exists(TimerKind::GetBlocks) {
            log::warn!("Duplicate getblocks request to {}", self.peer.address);
            return;
        }
        let locators = self.chain.read().await.locator();
        self.peer.channel.get_blocks(locators, Hash::NULL);
        self.timers
            .set(TimerKind::GetBlocks, self.config.request_timeout());
    }

    async fn request_headers(&mut self) {
        if self.timers.exists(TimerKind::GetHeaders) {
            log::warn!("Duplicate getheaders request to {}", self.peer.address);
            return;
        }
        let locators = self.chain.read().await.proofchain().locator();
        // Stop at the advertised head so the batch lines up with start_height
        self.peer.channel.get_headers(
            locators,
            self.peer.head_hash,
            self.config.getheaders_max,
            true,
        );
        self.timers
            .set(TimerKind::GetHeaders, self.config.request_timeout());
    }

    async fn request_accounts(&mut self) {
        if self.timers.exists(TimerKind::GetAccounts) {
            log::warn!("Duplicate getaccounts request to {}", self.peer.address);
            return;
        }
        let (height, mut addresses) = {
            let chain = self.chain.read().await;
            (chain.height(), chain.get_used_addresses())
        };
        addresses.truncate(MAX_ACCOUNTS_NODES);
        self.peer.channel.get_accounts(height, addresses);
        self.timers
            .set(TimerKind::GetAccounts, self.config.request_timeout());
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Queue the advertised objects we do not hold
    async fn request_objects(&mut self, vectors: Vec<InvVector>) {
        for vector in &vectors {
            self.inventory.mark_known(*vector);
        }

        let mut unknown = Vec::new();
        {
            let chain = self.chain.read().await;
            let mempool = self.mempool.read().await;
            for vector in vectors {
                let held = match vector.kind {
                    InvType::Block => match chain.get_block_entry(&vector.hash) {
                        Ok(entry) => entry.is_some(),
                        Err(e) => {
                            log::warn!("Failed to look up block {}: {}", vector.hash, e);
                            false
                        }
                    },
                    InvType::Transaction => mempool.contains(&vector.hash),
                };
                if !held {
                    unknown.push(vector);
                }
            }
        }

        if unknown.is_empty() {
            if !self.inventory.has_in_flight() {
                self.no_more_data().await;
            }
            return;
        }

        match self.inventory.queue(unknown) {
            QueueAction::RequestNow => {
                self.timers.clear(TimerKind::Inv);
                self.request_data();
            }
            QueueAction::Throttle => {
                self.timers
                    .reset(TimerKind::Inv, self.config.request_throttle());
            }
            QueueAction::Nothing => {}
        }
    }

    fn request_data(&mut self) {
        let Some(batch) = self.inventory.take_batch() else {
            return;
        };
        log::debug!(
            "Requesting {} objects from {}",
            batch.len(),
            self.peer.address
        );
        for chunk in batch.chunks(MAX_INV_VECTORS) {
            self.peer.channel.get_data(chunk.to_vec());
        }
        self.timers
            .reset(TimerKind::GetData, self.config.request_timeout());
    }

    async fn no_more_data(&mut self) {
        self.timers.clear(TimerKind::GetData);
        self.inventory.finish_batch();

        if self.inventory.queued() > 0 {
            self.request_data();
        } else if self.state == SyncState::Syncing {
            self.sync_blockchain().await;
        }
    }

    async fn object_received(&mut self, vector: InvVector) {
        match self.inventory.object_received(&vector) {
            ReceiveOutcome::Unsolicited => {}
            ReceiveOutcome::MoreExpected => {
                self.timers
                    .reset(TimerKind::GetData, self.config.request_timeout());
            }
            ReceiveOutcome::BatchComplete => self.no_more_data().await,
        }
    }

    // =========================================================================
    // Timers and local events
    // =========================================================================

    async fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Inv => self.request_data(),
            TimerKind::GetData => {
                let missing = self.inventory.finish_batch();
                if missing.is_empty() {
                    self.no_more_data().await;
                } else {
                    self.close(format!("getdata timeout ({} objects missing)", missing.len()));
                }
            }
            TimerKind::GetBlocks => self.close("getblocks timeout"),
            TimerKind::GetHeaders => self.close("getheaders timeout"),
            TimerKind::GetAccounts => self.close("getaccounts timeout"),
        }
    }

    async fn on_chain_event(&mut self, event: ChainEvent) {
        match event {
            ChainEvent::Extended(hash) => self.relay_block(hash),
            ChainEvent::Restarted(_) => {}
            ChainEvent::Ready => {
                if self.waiting_for_chain && self.state == SyncState::Syncing {
                    self.waiting_for_chain = false;
                    self.sync_blockchain().await;
                }
            }
        }
    }

    fn relay_block(&mut self, hash: Hash) {
        self.relay(InvVector::block(hash));
    }

    fn relay_transaction(&mut self, tx: &Transaction) {
        self.relay(InvVector::transaction(tx.hash()));
    }

    fn relay(&mut self, vector: InvVector) {
        if self.closed || self.state != SyncState::Synced || self.inventory.is_known(&vector) {
            return;
        }
        self.peer.channel.inv(vec![vector]);
        self.inventory.mark_known(vector);
    }

    // =========================================================================
    // Responses to our requests
    // =========================================================================

    async fn on_inv(&mut self, vectors: Vec<InvVector>) {
        self.timers.clear(TimerKind::GetBlocks);
        log::debug!(
            "[INV] {} vectors received from {}",
            vectors.len(),
            self.peer.address
        );
        self.request_objects(vectors).await;
    }

    async fn on_headers(&mut self, headers: Vec<BlockHeader>) {
        if !self.timers.exists(TimerKind::GetHeaders) {
            log::warn!(
                "Unsolicited headers received from {}, discarding",
                self.peer.address
            );
            return;
        }
        self.timers.clear(TimerKind::GetHeaders);

        // If the batch ends at the advertised head, this is the height of
        // its first header.
        let restart_height = self
            .peer
            .start_height
            .saturating_add(1)
            .checked_sub(headers.len() as u32)
            .filter(|height| *height > 1);

        let result = {
            let mut chain = self.chain.write().await;
            let result = Self::apply_headers(
                &mut chain,
                &headers,
                restart_height,
                self.config.verify_blocks_mini,
            );
            let events = chain.event_sender();
            drop(chain);
            let _ = events.send(ChainEvent::Ready);
            result
        };

        match result {
            Ok(vectors) => self.request_objects(vectors).await,
            Err(ChainError::Store(e)) => log::error!("Storage error while pushing headers: {}", e),
            Err(e) => {
                log::debug!("Invalid headers from {}: {}", self.peer.address, e);
                self.ban("received invalid headers");
            }
        }
    }

    /// Check the batch on a throwaway copy, commit it, and pick the newest
    /// blocks we still need.
    fn apply_headers(
        chain: &mut BlockChain,
        headers: &[BlockHeader],
        restart_height: Option<u32>,
        window: usize,
    ) -> Result<Vec<InvVector>, ChainError> {
        chain.proofchain().verify_batch(headers, restart_height)?;
        chain.proofchain_mut().push_all(headers, restart_height)?;

        let start = headers.len().saturating_sub(window);
        let mut vectors = Vec::new();
        for header in &headers[start..] {
            let hash = header.hash();
            if chain.get_block_entry(&hash)?.is_none() {
                vectors.push(InvVector::block(hash));
            }
        }
        Ok(vectors)
    }

    async fn on_block(&mut self, block: Block) {
        let hash = block.hash();
        let vector = InvVector::block(hash);
        if !self.inventory.is_requested(&vector) {
            log::warn!(
                "Unsolicited block {} received from {}, discarding",
                hash,
                self.peer.address
            );
            return;
        }

        self.blocks_received += 1;
        let reset = self.state == SyncState::Syncing
            && self.mode == ClientMode::Mini
            && self.blocks_received == 1;

        let result = {
            let mut chain = self.chain.write().await;
            let result = if reset {
                chain.reset_to(block.clone())
            } else {
                chain.push_block(block.clone())
            };
            let events = chain.event_sender();
            drop(chain);
            let _ = events.send(ChainEvent::Ready);
            result
        };

        match result {
            Ok(PushResult::Extended) => {
                let chain = self.chain.read().await;
                self.mempool.write().await.evict_block(&block, &chain);
            }
            Ok(PushResult::Restarted) => {}
            Ok(rejected) if rejected.is_invalid() => {
                self.ban("received invalid block");
                return;
            }
            Ok(rejected) => {
                log::debug!("Block {} from {}: {:?}", hash, self.peer.address, rejected);
                if reset {
                    self.blocks_received = 0;
                }
            }
            Err(e) => log::error!("Storage error while pushing block {}: {}", hash, e),
        }

        self.object_received(vector).await;
    }

    async fn on_tx(&mut self, tx: Transaction) {
        let hash = tx.hash();
        log::info!("[TX] Received transaction {} from {}", hash, self.peer.address);

        let vector = InvVector::transaction(hash);
        if !self.inventory.is_requested(&vector) {
            log::warn!(
                "Unsolicited transaction {} received from {}, discarding",
                hash,
                self.peer.address
            );
            return;
        }

        {
            let chain = self.chain.read().await;
            let mut mempool = self.mempool.write().await;
            if let Err(e) = mempool.push_transaction(tx, &chain) {
                log::debug!("Transaction {} not added to mempool: {}", hash, e);
            }
        }

        self.object_received(vector).await;
    }

    async fn on_not_found(&mut self, vectors: Vec<InvVector>) {
        log::debug!(
            "[NOTFOUND] {} unknown objects received from {}",
            vectors.len(),
            self.peer.address
        );
        for vector in vectors {
            if self.closed {
                return;
            }
            if !self.inventory.is_requested(&vector) {
                log::warn!(
                    "Unsolicited notfound vector received from {}, discarding",
                    self.peer.address
                );
                continue;
            }
            self.object_received(vector).await;
        }
    }

    async fn on_accounts(&mut self, height: u32, nodes: Vec<AccountsTreeNode>) {
        if !self.timers.exists(TimerKind::GetAccounts) {
            log::warn!(
                "Unsolicited accounts received from {}, discarding",
                self.peer.address
            );
            return;
        }
        self.timers.clear(TimerKind::GetAccounts);

        let outcome = {
            let mut chain = self.chain.write().await;
            let outcome = if chain.height() != height {
                Ok(AccountsOutcome::Retry("height mismatch"))
            } else if !chain.populate_accounts_tree(&nodes) {
                Ok(AccountsOutcome::Retry("accounts hash mismatch"))
            } else {
                match Self::verify_recent_blocks(&chain, self.config.verify_blocks_mini) {
                    Ok(true) => Ok(AccountsOutcome::Verified),
                    Ok(false) => {
                        chain.discard_accounts();
                        Ok(AccountsOutcome::Mismatch)
                    }
                    Err(e) => {
                        chain.discard_accounts();
                        Err(e)
                    }
                }
            };
            let events = chain.event_sender();
            drop(chain);
            let _ = events.send(ChainEvent::Ready);
            outcome
        };

        match outcome {
            Ok(AccountsOutcome::Verified) => {
                log::info!("Accounts verified with {}", self.peer.address);
                self.set_synced();
            }
            Ok(AccountsOutcome::Retry(reason)) => self.retry_accounts(reason, height).await,
            Ok(AccountsOutcome::Mismatch) => self.ban("received invalid accounts or block"),
            Err(e) => log::error!("Failed to verify accounts: {}", e),
        }
    }

    /// `height` is the peer's height as reported in its accounts reply.
    async fn retry_accounts(&mut self, reason: &str, height: u32) {
        log::debug!("Failed to populate accounts tree: {}", reason);
        self.failed_syncs += 1;
        if self.failed_syncs >= self.config.max_sync_attempts {
            self.ban("accounts sync failed");
            return;
        }
        if height > self.peer.start_height {
            // The peer moved on since the handshake; fetch up to its new head
            self.peer.start_height = height;
            self.peer.head_hash = Hash::NULL;
        }
        self.sync_blockchain().await;
    }

    /// Walk back from the head on a throwaway accounts view, checking the
    /// recorded accounts hash of every block before reverting it.
    fn verify_recent_blocks(chain: &BlockChain, count: usize) -> Result<bool, ChainError> {
        let mut accounts = chain.create_temporary_accounts();
        let mut head = chain.head_hash();
        for _ in 0..count.min(chain.path().len()) {
            let block = chain
                .get_block(&head)?
                .ok_or(ChainError::UnknownHeader(head))?;
            if accounts.hash() != block.header.accounts_hash() {
                return Ok(false);
            }
            if accounts.revert_block(&block.body).is_err() {
                return Ok(false);
            }
            head = block.prev_hash();
        }
        Ok(true)
    }

    // =========================================================================
    // Request endpoints
    // =========================================================================

    async fn on_get_data(&mut self, vectors: Vec<InvVector>) {
        for vector in &vectors {
            self.inventory.mark_known(*vector);
        }

        let mut unknown = Vec::new();
        {
            let chain = self.chain.read().await;
            let mempool = self.mempool.read().await;
            for vector in vectors {
                match vector.kind {
                    InvType::Block => match chain.get_block(&vector.hash) {
                        Ok(Some(block)) => self.peer.channel.block(block),
                        Ok(None) => unknown.push(vector),
                        Err(e) => {
                            log::warn!("Failed to load block {}: {}", vector.hash, e);
                            unknown.push(vector);
                        }
                    },
                    InvType::Transaction => match mempool.get_transaction(&vector.hash) {
                        Some(tx) => self.peer.channel.tx(tx.clone()),
                        None => unknown.push(vector),
                    },
                }
            }
        }

        if !unknown.is_empty() {
            self.peer.channel.not_found(unknown);
        }
    }

    async fn on_get_blocks(&mut self, locators: &[Hash], hash_stop: &Hash) {
        log::debug!(
            "[GETBLOCKS] {} block locators received from {}",
            locators.len(),
            self.peer.address
        );
        let vectors = {
            let chain = self.chain.read().await;
            let path = chain.path();
            let matched = path.locate(locators, Block::genesis_hash());
            let max = self.config.getblocks_vectors_max.min(MAX_INV_VECTORS);
            let range = path.response_range(matched, hash_stop, max, false);
            path.as_slice()[range]
                .iter()
                .map(|hash| InvVector::block(*hash))
                .collect()
        };
        self.peer.channel.inv(vectors);
    }

    async fn on_get_headers(
        &mut self,
        locators: &[Hash],
        hash_stop: &Hash,
        max_num: u16,
        reverse: bool,
    ) {
        log::debug!(
            "[GETHEADERS] {} block locators received from {}",
            locators.len(),
            self.peer.address
        );
        let headers = {
            let chain = self.chain.read().await;
            let proofchain = chain.proofchain();
            let path = proofchain.path();
            let matched = path.locate(locators, Block::genesis_hash());
            let max = (max_num as usize).min(MAX_HEADERS);
            let range = path.response_range(matched, hash_stop, max, reverse);

            let mut headers = Vec::with_capacity(range.len());
            for hash in &path.as_slice()[range] {
                match proofchain.get_header(hash) {
                    Ok(Some(header)) => headers.push(header),
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("Failed to load header {}: {}", hash, e);
                        break;
                    }
                }
            }
            headers
        };
        self.peer.channel.headers(headers);
    }

    async fn on_mempool(&mut self) {
        let transactions = self.mempool.read().await.get_transactions(usize::MAX);
        for tx in transactions {
            self.inventory.mark_known(InvVector::transaction(tx.hash()));
            self.peer.channel.tx(tx);
        }
    }

    async fn on_get_accounts(&mut self, height: u32, addresses: &[Address]) {
        log::debug!(
            "[GETACCOUNTS] {} accounts slices requested from {}",
            addresses.len(),
            self.peer.address
        );
        let (our_height, nodes) = {
            let chain = self.chain.read().await;
            let mut seen = HashSet::new();
            let nodes: Vec<AccountsTreeNode> = chain
                .get_account_slices(addresses)
                .into_iter()
                .filter(|node| seen.insert(node.address))
                .take(MAX_ACCOUNTS_NODES)
                .collect();
            (chain.height(), nodes)
        };
        if height != our_height {
            log::debug!(
                "Peer {} asked for accounts at height {}, we are at {}",
                self.peer.address,
                height,
                our_height
            );
        }
        self.peer.channel.accounts(our_height, nodes);
    }

    // =========================================================================
    // Connection teardown
    // =========================================================================

    fn close(&mut self, reason: impl Into<String>) {
        if self.closed {
            return;
        }
        let reason = reason.into();
        log::info!("Closing connection to {}: {}", self.peer.address, reason);
        self.peer.channel.close(reason.clone());
        self.shutdown(reason, false);
    }

    fn ban(&mut self, reason: impl Into<String>) {
        if self.closed {
            return;
        }
        let reason = reason.into();
        log::warn!("Banning peer {}: {}", self.peer.address, reason);
        self.peer.channel.ban(reason.clone());
        self.shutdown(reason, true);
    }

    fn shutdown(&mut self, reason: String, banned: bool) {
        self.closed = true;
        self.timers.clear_all();
        let _ = self.events.send(AgentEvent::Closed { reason, banned });
    }
}
