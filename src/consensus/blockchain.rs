//! Full-block chain
//!
//! Wraps a [`ProofChain`] with block bodies and the accounts state. Full
//! nodes keep both paths identical from genesis; light clients let the
//! proof chain run ahead and hold only the most recent blocks, rooted at a
//! block obtained through [`BlockChain::reset_to`].
//!
//! Features:
//! - Accounts hash validation on every extension
//! - Side-chain storage and rebranching onto a longer fork
//! - Accounts snapshot download for light clients
//! - Typed chain events over a broadcast channel

use crate::config::{ChainPolicy, ClientMode, NodeConfig};
use crate::consensus::accounts::{Accounts, AccountsTreeNode, MemoryAccounts};
use crate::consensus::error::ChainError;
use crate::consensus::path::{load_path, MainPath};
use crate::consensus::proofchain::ProofChain;
use crate::core::{Address, Block, BlockHeader};
use crate::crypto::Hash;
use crate::storage::{ChainEntry, ChainStore, PersistentChainStore, StoreError, VolatileChainStore};
use tokio::sync::broadcast;

/// Boxed chain store
pub type BoxedStore<T> = Box<dyn ChainStore<T>>;

/// Notifications for local listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEvent {
    /// New main-chain head, either appended or reached by rebranching
    Extended(Hash),
    /// Chain restarted from a trusted block
    Restarted(Hash),
    /// Block processing finished; waiting agents may continue syncing
    Ready,
}

/// Why a block was not accepted
#[derive(Debug)]
pub enum RejectReason {
    Known,
    /// Parent unknown
    Orphan,
    /// Stored on a side chain that is not longer than the main chain
    Forked,
    Invalid(ChainError),
}

/// Outcome of pushing a block
#[derive(Debug)]
pub enum PushResult {
    Extended,
    Restarted,
    Rejected(RejectReason),
}

impl PushResult {
    pub fn is_invalid(&self) -> bool {
        matches!(self, PushResult::Rejected(RejectReason::Invalid(_)))
    }
}

pub struct BlockChain {
    mode: ClientMode,
    proofchain: ProofChain<BoxedStore<BlockHeader>>,
    blocks: BoxedStore<Block>,
    path: MainPath,
    head: ChainEntry<Block>,
    accounts: Box<dyn Accounts>,
    accounts_complete: bool,
    events: broadcast::Sender<ChainEvent>,
}

impl BlockChain {
    /// Open a chain over the given stores, seeding genesis when empty
    pub fn new(
        mode: ClientMode,
        policy: ChainPolicy,
        headers: BoxedStore<BlockHeader>,
        mut blocks: BoxedStore<Block>,
        mut accounts: Box<dyn Accounts>,
    ) -> Result<Self, ChainError> {
        let proofchain = ProofChain::new(headers, policy)?;
        accounts.clear();

        let (path, head, accounts_complete) = match blocks.main_head()? {
            Some(head) => {
                let path = load_path(&blocks, head.hash())?;
                let complete = path.first() == Some(Block::genesis_hash());
                if complete {
                    for hash in path.as_slice() {
                        let entry = blocks
                            .get(hash)?
                            .ok_or(ChainError::UnknownHeader(*hash))?;
                        accounts.apply_block(&entry.data.body)?;
                    }
                }
                log::info!(
                    "Loaded block chain: head {} at height {} (accounts {})",
                    head.hash(),
                    head.height,
                    if complete { "replayed" } else { "pending" }
                );
                (path, head, complete)
            }
            None => {
                let genesis = ChainEntry::new(Block::genesis().clone(), 1);
                let hash = blocks.put(genesis.clone())?;
                blocks.set_main_head(hash)?;
                accounts.apply_block(&genesis.data.body)?;
                (MainPath::from_hashes(vec![hash]), genesis, true)
            }
        };

        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            mode,
            proofchain,
            blocks,
            path,
            head,
            accounts,
            accounts_complete,
            events,
        })
    }

    /// In-memory chain with an in-memory ledger
    pub fn volatile(mode: ClientMode, policy: ChainPolicy) -> Result<Self, ChainError> {
        Self::new(
            mode,
            policy,
            Box::new(VolatileChainStore::new()),
            Box::new(VolatileChainStore::new()),
            Box::new(MemoryAccounts::new()),
        )
    }

    /// File-backed chain under the configured data directory
    pub fn persistent(config: &NodeConfig) -> Result<Self, ChainError> {
        let headers = PersistentChainStore::<BlockHeader>::open(config.headers_dir())?;
        let blocks = PersistentChainStore::<Block>::open(config.blocks_dir())?;
        Self::new(
            config.mode,
            config.policy,
            Box::new(headers),
            Box::new(blocks),
            Box::new(MemoryAccounts::new()),
        )
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    pub fn height(&self) -> u32 {
        self.head.height
    }

    pub fn head(&self) -> &ChainEntry<Block> {
        &self.head
    }

    pub fn head_hash(&self) -> Hash {
        self.head.hash()
    }

    pub fn path(&self) -> &MainPath {
        &self.path
    }

    pub fn proofchain(&self) -> &ProofChain<BoxedStore<BlockHeader>> {
        &self.proofchain
    }

    pub fn proofchain_mut(&mut self) -> &mut ProofChain<BoxedStore<BlockHeader>> {
        &mut self.proofchain
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.get(hash)?.map(|e| e.data))
    }

    pub fn get_block_entry(&self, hash: &Hash) -> Result<Option<ChainEntry<Block>>, StoreError> {
        self.blocks.get(hash)
    }

    /// Header from the proof chain, falling back to stored blocks
    pub fn get_header(&self, hash: &Hash) -> Result<Option<BlockHeader>, StoreError> {
        if let Some(entry) = self.proofchain.store().get(hash)? {
            return Ok(Some(entry.data));
        }
        Ok(self.blocks.get(hash)?.map(|e| e.data.header))
    }

    /// Block locator over the block path
    pub fn locator(&self) -> Vec<Hash> {
        self.path.locator(Block::genesis_hash())
    }

    pub fn accounts_complete(&self) -> bool {
        self.accounts_complete
    }

    pub fn accounts_hash(&self) -> Hash {
        self.accounts.hash()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Sender for chain events, for signalling [`ChainEvent::Ready`] once a
    /// write lock on the chain has been released.
    pub fn event_sender(&self) -> broadcast::Sender<ChainEvent> {
        self.events.clone()
    }

    fn emit(&self, event: ChainEvent) {
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Block processing
    // =========================================================================

    /// Validate and store a block. Storage failures are the only errors;
    /// every validation outcome is a [`PushResult`].
    pub fn push_block(&mut self, block: Block) -> Result<PushResult, StoreError> {
        let hash = block.hash();
        if self.blocks.get(&hash)?.is_some() {
            return Ok(PushResult::Rejected(RejectReason::Known));
        }
        if !block.verify_body_hash() {
            return Ok(PushResult::Rejected(RejectReason::Invalid(
                ChainError::BodyHashMismatch(hash),
            )));
        }
        if let Err(e) = self.proofchain.verify_integrity(&block.header) {
            return Self::settle(Err(e));
        }

        let Some(parent) = self.blocks.get(&block.prev_hash())? else {
            log::debug!("Orphan block {} (parent {})", hash, block.prev_hash());
            return Ok(PushResult::Rejected(RejectReason::Orphan));
        };

        let result = if parent.hash() == self.head.hash() {
            self.extend(block, parent.height + 1)
        } else {
            self.store_side_block(block, parent.height + 1)
        };
        Self::settle(result)
    }

    fn settle(result: Result<PushResult, ChainError>) -> Result<PushResult, StoreError> {
        match result {
            Ok(result) => Ok(result),
            Err(ChainError::Store(e)) => Err(e),
            Err(e) if e.is_invalid() => {
                log::warn!("Rejected invalid block: {}", e);
                Ok(PushResult::Rejected(RejectReason::Invalid(e)))
            }
            Err(e) => {
                log::debug!("Block does not fit the chain: {}", e);
                Ok(PushResult::Rejected(RejectReason::Forked))
            }
        }
    }

    fn check_accounts(
        accounts: &dyn Accounts,
        header: &BlockHeader,
    ) -> Result<(), ChainError> {
        let computed = accounts.hash();
        if computed != header.accounts_hash() {
            return Err(ChainError::AccountsHashMismatch {
                expected: header.accounts_hash(),
                computed,
            });
        }
        Ok(())
    }

    fn extend(&mut self, block: Block, height: u32) -> Result<PushResult, ChainError> {
        let hash = block.hash();

        let next_accounts = if self.accounts_complete {
            let mut accounts = self.accounts.fork();
            accounts.apply_block(&block.body)?;
            Self::check_accounts(accounts.as_ref(), &block.header)?;
            Some(accounts)
        } else {
            None
        };

        if !self.proofchain.path().contains(&hash) {
            self.proofchain.push(block.header.clone(), None)?;
        }

        self.blocks.put(ChainEntry::new(block, height))?;
        self.blocks.set_main_head(hash)?;
        self.path.push(hash);
        self.head = self
            .blocks
            .get(&hash)?
            .ok_or(ChainError::UnknownHeader(hash))?;
        if let Some(accounts) = next_accounts {
            self.accounts = accounts;
        }

        log::debug!("Block {} extends the chain to height {}", hash, height);
        self.emit(ChainEvent::Extended(hash));
        Ok(PushResult::Extended)
    }

    fn store_side_block(&mut self, block: Block, height: u32) -> Result<PushResult, ChainError> {
        let hash = block.hash();
        self.blocks.put(ChainEntry::new(block, height))?;
        if height <= self.head.height {
            log::debug!(
                "Stored fork block {} at height {} (head at {})",
                hash,
                height,
                self.head.height
            );
            return Ok(PushResult::Rejected(RejectReason::Forked));
        }

        match self.rebranch(hash) {
            Err(e) if e.is_invalid() => {
                self.blocks.remove(&hash)?;
                Err(e)
            }
            other => other,
        }
    }

    /// Switch the main chain to the side chain ending at `tip`
    fn rebranch(&mut self, tip: Hash) -> Result<PushResult, ChainError> {
        let mut fork = Vec::new();
        let mut cursor = tip;
        let fork_point = loop {
            if let Some(i) = self.path.position(&cursor) {
                break i;
            }
            let entry = self
                .blocks
                .get(&cursor)?
                .ok_or(ChainError::UnknownHeader(cursor))?;
            cursor = entry.data.prev_hash();
            fork.push(entry);
        };
        fork.reverse();

        let next_accounts = if self.accounts_complete {
            let mut accounts = self.accounts.fork();
            for i in (fork_point + 1..self.path.len()).rev() {
                let hash = self.path.get(i).ok_or(ChainError::NotOnMainPath(tip))?;
                let entry = self
                    .blocks
                    .get(&hash)?
                    .ok_or(ChainError::UnknownHeader(hash))?;
                accounts.revert_block(&entry.data.body)?;
            }
            for entry in &fork {
                accounts.apply_block(&entry.data.body)?;
                Self::check_accounts(accounts.as_ref(), &entry.data.header)?;
            }
            Some(accounts)
        } else {
            None
        };

        let speculation = {
            let mut headers = self.proofchain.speculate();
            headers.revert_to(&cursor)?;
            for entry in &fork {
                headers.push(entry.data.header.clone(), None)?;
            }
            headers.into_speculation()
        };
        self.proofchain.adopt(speculation)?;

        let reverted = self.path.len() - fork_point - 1;
        self.path.truncate(fork_point + 1);
        for entry in &fork {
            self.path.push(entry.hash());
        }
        if let Some(head) = fork.pop() {
            self.blocks.set_main_head(head.hash())?;
            self.head = head;
        }
        if let Some(accounts) = next_accounts {
            self.accounts = accounts;
        }

        log::info!(
            "Rebranched to {} at height {} ({} blocks reverted)",
            tip,
            self.head.height,
            reverted
        );
        self.emit(ChainEvent::Extended(tip));
        Ok(PushResult::Extended)
    }

    /// Discard block history and restart from a block whose header is on
    /// the proof chain. Accounts stay incomplete until populated.
    pub fn reset_to(&mut self, block: Block) -> Result<PushResult, StoreError> {
        let hash = block.hash();
        if !block.verify_body_hash() {
            return Ok(PushResult::Rejected(RejectReason::Invalid(
                ChainError::BodyHashMismatch(hash),
            )));
        }
        let height = match self.proofchain.store().get(&hash)? {
            Some(entry) if self.proofchain.path().contains(&hash) => entry.height,
            _ => {
                log::debug!("Cannot reset to {}: not on the proof chain", hash);
                return Ok(PushResult::Rejected(RejectReason::Forked));
            }
        };

        let entry = ChainEntry::new(block, height);
        self.blocks.put(entry.clone())?;
        self.blocks.set_main_head(hash)?;
        self.path = MainPath::from_hashes(vec![hash]);
        self.head = entry;
        self.discard_accounts();

        log::info!("Block chain reset to {} at height {}", hash, height);
        self.emit(ChainEvent::Restarted(hash));
        Ok(PushResult::Restarted)
    }

    // =========================================================================
    // Accounts interface
    // =========================================================================

    pub fn get_used_addresses(&self) -> Vec<Address> {
        self.accounts.used_addresses()
    }

    /// Slices of the accounts state; nothing while it is incomplete
    pub fn get_account_slices(&self, addresses: &[Address]) -> Vec<AccountsTreeNode> {
        if !self.accounts_complete {
            return Vec::new();
        }
        self.accounts.slices(addresses)
    }

    /// Replace the accounts state with downloaded nodes. Succeeds only if
    /// the result matches the head's accounts hash.
    pub fn populate_accounts_tree(&mut self, nodes: &[AccountsTreeNode]) -> bool {
        self.accounts.clear();
        if let Err(e) = self.accounts.populate(nodes) {
            log::debug!("Failed to populate accounts: {}", e);
            self.discard_accounts();
            return false;
        }
        if self.accounts.hash() != self.head.data.header.accounts_hash() {
            log::debug!(
                "Populated accounts do not match head {} at height {}",
                self.head.hash(),
                self.head.height
            );
            self.discard_accounts();
            return false;
        }
        self.accounts_complete = true;
        true
    }

    /// Forget the accounts state
    pub fn discard_accounts(&mut self) {
        self.accounts.clear();
        self.accounts_complete = false;
    }

    /// Independent accounts view for replay verification
    pub fn create_temporary_accounts(&self) -> Box<dyn Accounts> {
        self.accounts.fork()
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Re-check every block on the main path. Returns the number checked.
    pub fn verify(&self) -> Result<usize, ChainError> {
        let rooted = self.path.first() == Some(Block::genesis_hash());
        let mut accounts: Option<Box<dyn Accounts>> = if rooted {
            Some(Box::new(MemoryAccounts::new()))
        } else {
            None
        };
        let mut prev: Option<ChainEntry<Block>> = None;

        for hash in self.path.as_slice() {
            let entry = self
                .blocks
                .get(hash)?
                .ok_or(ChainError::UnknownHeader(*hash))?;
            let block = &entry.data;

            if !block.verify_body_hash() {
                return Err(ChainError::BodyHashMismatch(*hash));
            }
            if let Some(prev) = &prev {
                if block.prev_hash() != prev.hash() {
                    return Err(ChainError::DoesNotChain(*hash));
                }
                self.proofchain.verify_integrity(&block.header)?;
            }
            if let Some(accounts) = accounts.as_mut() {
                accounts.apply_block(&block.body)?;
                Self::check_accounts(accounts.as_ref(), &block.header)?;
            }
            prev = Some(entry);
        }
        Ok(self.path.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::mining::Miner;
    use tempfile::tempdir;

    pub(crate) fn full_chain() -> BlockChain {
        BlockChain::volatile(ClientMode::Full, ChainPolicy::default()).unwrap()
    }

    /// Mine `count` blocks on `chain` with the given miner seed
    pub(crate) fn mine(chain: &mut BlockChain, count: usize, seed: &str) -> Vec<Block> {
        let miner = Miner::new(Address::from_seed(seed.as_bytes()));
        (0..count)
            .map(|_| {
                let timestamp = chain.head().data.header.timestamp() + 60;
                let (block, _) = miner.build_block(chain, Vec::new(), timestamp).unwrap();
                assert!(matches!(
                    chain.push_block(block.clone()).unwrap(),
                    PushResult::Extended
                ));
                block
            })
            .collect()
    }

    #[test]
    fn test_genesis_and_extend() {
        let mut chain = full_chain();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.head_hash(), Block::genesis_hash());
        assert_eq!(chain.accounts_hash(), Block::genesis().header.accounts_hash());

        let mut events = chain.subscribe();
        let blocks = mine(&mut chain, 3, "alice");
        assert_eq!(chain.height(), 4);
        assert_eq!(chain.proofchain().height(), 4);
        assert_eq!(chain.path().as_slice(), chain.proofchain().path().as_slice());
        assert_eq!(events.try_recv().unwrap(), ChainEvent::Extended(blocks[0].hash()));

        assert!(matches!(
            chain.push_block(blocks[1].clone()).unwrap(),
            PushResult::Rejected(RejectReason::Known)
        ));
        assert_eq!(chain.verify().unwrap(), 4);
    }

    #[test]
    fn test_rejects_bad_accounts_hash() {
        let mut chain = full_chain();
        let miner = Miner::new(Address::from_seed(b"alice"));
        let timestamp = chain.head().data.header.timestamp() + 60;
        let (block, _) = miner.build_block(&chain, Vec::new(), timestamp).unwrap();

        let mut builder = block.header.to_builder();
        builder.accounts_hash = Hash::digest(b"forged");
        let (header, _) = builder.mine();
        let forged = Block::new(header, block.body.clone());

        let result = chain.push_block(forged).unwrap();
        assert!(matches!(
            result,
            PushResult::Rejected(RejectReason::Invalid(ChainError::AccountsHashMismatch { .. }))
        ));
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.proofchain().height(), 1);
    }

    #[test]
    fn test_rejects_body_mismatch_and_orphans() {
        let mut chain = full_chain();
        let mut source = full_chain();
        let blocks = mine(&mut source, 2, "alice");

        let mut tampered = blocks[0].clone();
        tampered.body.miner = Address::from_seed(b"mallory");
        assert!(chain.push_block(tampered).unwrap().is_invalid());

        assert!(matches!(
            chain.push_block(blocks[1].clone()).unwrap(),
            PushResult::Rejected(RejectReason::Orphan)
        ));
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_transactions_move_balances() {
        let mut chain = full_chain();
        let alice = Address::from_seed(b"alice");
        mine(&mut chain, 1, "alice");

        let miner = Miner::new(Address::from_seed(b"bob"));
        let tx = Transaction::new(alice, Address::from_seed(b"carol"), 10, 1, 0);
        let timestamp = chain.head().data.header.timestamp() + 60;
        let (block, _) = miner.build_block(&chain, vec![tx], timestamp).unwrap();
        assert!(matches!(chain.push_block(block).unwrap(), PushResult::Extended));

        let nodes = chain.get_account_slices(&[alice]);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].balance, crate::core::BLOCK_REWARD - 11);
        assert_eq!(nodes[0].nonce, 1);
    }

    #[test]
    fn test_rebranch_to_longer_fork() {
        let mut short = full_chain();
        let short_blocks = mine(&mut short, 3, "alice");
        let mut long = full_chain();
        let long_blocks = mine(&mut long, 5, "bob");

        let mut chain = full_chain();
        for block in &short_blocks {
            assert!(matches!(chain.push_block(block.clone()).unwrap(), PushResult::Extended));
        }
        for block in &long_blocks[..3] {
            assert!(matches!(
                chain.push_block(block.clone()).unwrap(),
                PushResult::Rejected(RejectReason::Forked)
            ));
        }
        assert_eq!(chain.head_hash(), short_blocks[2].hash());

        assert!(matches!(
            chain.push_block(long_blocks[3].clone()).unwrap(),
            PushResult::Extended
        ));
        assert_eq!(chain.head_hash(), long_blocks[3].hash());
        assert_eq!(chain.height(), 5);
        assert_eq!(chain.accounts_hash(), long_blocks[3].header.accounts_hash());
        assert_eq!(chain.proofchain().head_hash(), Some(long_blocks[3].hash()));
        assert_eq!(chain.path().as_slice(), chain.proofchain().path().as_slice());

        assert!(matches!(
            chain.push_block(long_blocks[4].clone()).unwrap(),
            PushResult::Extended
        ));
        assert_eq!(chain.path().as_slice(), long.path().as_slice());
        assert_eq!(chain.verify().unwrap(), 6);
    }

    #[test]
    fn test_reset_and_populate_accounts() {
        let mut source = full_chain();
        let blocks = mine(&mut source, 6, "alice");

        let mut light = BlockChain::volatile(ClientMode::Mini, ChainPolicy::default()).unwrap();
        let headers: Vec<BlockHeader> = blocks.iter().map(|b| b.header.clone()).collect();
        light.proofchain_mut().push_all(&headers[3..], Some(5)).unwrap();
        assert_eq!(light.proofchain().height(), 7);

        assert!(matches!(
            light.reset_to(blocks[3].clone()).unwrap(),
            PushResult::Restarted
        ));
        assert_eq!(light.height(), 5);
        assert!(!light.accounts_complete());
        assert!(light.get_account_slices(&[]).is_empty());

        for block in &blocks[4..] {
            assert!(matches!(light.push_block(block.clone()).unwrap(), PushResult::Extended));
        }
        assert_eq!(light.height(), 7);

        // Snapshot from a different height does not match
        let mut stale = full_chain();
        mine(&mut stale, 2, "bob");
        assert!(!light.populate_accounts_tree(&stale.get_account_slices(&[])));
        assert!(!light.accounts_complete());

        assert!(light.populate_accounts_tree(&source.get_account_slices(&[])));
        assert!(light.accounts_complete());
        assert_eq!(light.accounts_hash(), source.accounts_hash());
    }

    #[test]
    fn test_reset_requires_proof_chain_header() {
        let mut source = full_chain();
        let blocks = mine(&mut source, 2, "alice");
        let mut light = BlockChain::volatile(ClientMode::Mini, ChainPolicy::default()).unwrap();
        assert!(matches!(
            light.reset_to(blocks[1].clone()).unwrap(),
            PushResult::Rejected(RejectReason::Forked)
        ));
        assert_eq!(light.height(), 1);
    }

    #[test]
    fn test_persistent_reload_replays_accounts() {
        let dir = tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..NodeConfig::default()
        };

        let head = {
            let mut chain = BlockChain::persistent(&config).unwrap();
            mine(&mut chain, 3, "alice");
            (chain.head_hash(), chain.accounts_hash())
        };

        let chain = BlockChain::persistent(&config).unwrap();
        assert_eq!(chain.height(), 4);
        assert_eq!((chain.head_hash(), chain.accounts_hash()), head);
        assert!(chain.accounts_complete());
        assert_eq!(chain.proofchain().height(), 4);
        assert_eq!(chain.verify().unwrap(), 4);
    }
}
