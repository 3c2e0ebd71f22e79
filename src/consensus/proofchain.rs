//! Header-only proof chain
//!
//! Maintains the main path of headers from its root to the head, enforces
//! proof of work, timestamps and difficulty retargets, and supports the
//! light-client restart, revert and speculative validation.
//!
//! Features:
//! - Integrity checks (proof of work, timestamp drift)
//! - Chainability checks (parent timestamp, retarget prediction)
//! - Restart onto a header that does not chain (light clients)
//! - Revert to any header on the main path
//! - Disposable speculative copies over a [`TemporaryChainStore`]

use crate::config::ChainPolicy;
use crate::consensus::difficulty;
use crate::consensus::error::ChainError;
use crate::consensus::path::{load_path, MainPath};
use crate::core::{current_timestamp, Block, BlockHeader};
use crate::crypto::Hash;
use crate::storage::{ChainEntry, ChainStore, StoreBatch, TemporaryChainStore, VolatileChainStore};
use tokio::sync::broadcast;

/// Result of a successful push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Header already on the main path
    Known,
    /// Header appended to the head
    Extended,
    /// Chain replaced by a single-header chain rooted at the header
    Restarted,
}

/// Changes to the main path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEvent {
    Extended(Hash),
    Restarted(Hash),
    Reverted(Hash),
}

/// Outcome of a speculative run, ready to be adopted
pub struct Speculation {
    batch: StoreBatch<BlockHeader>,
    path: MainPath,
    head: Option<ChainEntry<BlockHeader>>,
}

/// An in-memory proof chain
pub type VolatileProofChain = ProofChain<VolatileChainStore<BlockHeader>>;

pub struct ProofChain<S> {
    store: S,
    path: MainPath,
    head: Option<ChainEntry<BlockHeader>>,
    policy: ChainPolicy,
    events: Option<broadcast::Sender<HeaderEvent>>,
}

impl VolatileProofChain {
    /// Fresh in-memory chain holding only the genesis header
    pub fn volatile(policy: ChainPolicy) -> Result<Self, ChainError> {
        Self::new(VolatileChainStore::new(), policy)
    }
}

impl<S: ChainStore<BlockHeader>> ProofChain<S> {
    /// Open a chain over `store`, seeding it with genesis when empty
    pub fn new(store: S, policy: ChainPolicy) -> Result<Self, ChainError> {
        let mut chain = Self {
            store,
            path: MainPath::new(),
            head: None,
            policy,
            events: None,
        };
        chain.init()?;
        Ok(chain)
    }

    /// Rebuild the main path from the stored head
    pub fn init(&mut self) -> Result<(), ChainError> {
        match self.store.main_head()? {
            Some(head) => {
                self.path = load_path(&self.store, head.hash())?;
                log::debug!(
                    "Loaded proof chain: head {} at height {}, {} headers on path",
                    head.hash(),
                    head.height,
                    self.path.len()
                );
                self.head = Some(head);
            }
            None => {
                let genesis = ChainEntry::new(Block::genesis().header.clone(), 1);
                let hash = self.store.put(genesis.clone())?;
                self.store.set_main_head(hash)?;
                self.path = MainPath::from_hashes(vec![hash]);
                self.head = Some(genesis);
            }
        }
        Ok(())
    }

    /// Subscribe to main path changes
    pub fn subscribe(&mut self) -> broadcast::Receiver<HeaderEvent> {
        match &self.events {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(256);
                self.events = Some(tx);
                rx
            }
        }
    }

    fn emit(&self, event: HeaderEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn height(&self) -> u32 {
        self.head.as_ref().map(|h| h.height).unwrap_or(0)
    }

    pub fn head(&self) -> Option<&ChainEntry<BlockHeader>> {
        self.head.as_ref()
    }

    pub fn head_hash(&self) -> Option<Hash> {
        self.head.as_ref().map(|h| h.hash())
    }

    pub fn path(&self) -> &MainPath {
        &self.path
    }

    pub fn policy(&self) -> &ChainPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get(&self, hash: &Hash) -> Result<Option<ChainEntry<BlockHeader>>, ChainError> {
        Ok(self.store.get(hash)?)
    }

    pub fn get_header(&self, hash: &Hash) -> Result<Option<BlockHeader>, ChainError> {
        Ok(self.store.get(hash)?.map(|e| e.data))
    }

    /// Block locator over the main path
    pub fn locator(&self) -> Vec<Hash> {
        self.path.locator(Block::genesis_hash())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Checks that depend only on the header itself
    pub fn verify_integrity(&self, header: &BlockHeader) -> Result<(), ChainError> {
        let now = current_timestamp();
        if header.timestamp() > now.saturating_add(self.policy.timestamp_drift_secs) {
            return Err(ChainError::FromFuture {
                timestamp: header.timestamp(),
                now,
            });
        }
        if !header.is_proof_of_work() {
            return Err(ChainError::InvalidProofOfWork {
                hash: header.hash(),
                difficulty: header.difficulty(),
            });
        }
        Ok(())
    }

    /// Checks of a header against the parent it would extend
    pub fn verify_chainability(
        &self,
        header: &BlockHeader,
        parent: &ChainEntry<BlockHeader>,
    ) -> Result<(), ChainError> {
        if header.timestamp() < parent.data.timestamp() {
            return Err(ChainError::TimestampBeforeParent {
                timestamp: header.timestamp(),
                parent: parent.data.timestamp(),
            });
        }
        if let Some(expected) = self.expected_difficulty(parent)? {
            if header.difficulty() != expected {
                return Err(ChainError::DifficultyMismatch {
                    expected,
                    got: header.difficulty(),
                });
            }
        }
        Ok(())
    }

    /// Difficulty required of a child of `parent`, if enough history is
    /// available to enforce it.
    pub fn expected_difficulty(
        &self,
        parent: &ChainEntry<BlockHeader>,
    ) -> Result<Option<u32>, ChainError> {
        let interval = self.policy.adjustment_interval.max(1);
        if parent.height % interval != 0 {
            return Ok(Some(parent.data.difficulty()));
        }

        let index = match self.path.position(&parent.hash()) {
            Some(i) if i >= interval as usize => i,
            _ => return Ok(None),
        };
        let earlier_hash = self
            .path
            .get(index - interval as usize)
            .ok_or(ChainError::NotOnMainPath(parent.hash()))?;
        let earlier = self
            .store
            .get(&earlier_hash)?
            .ok_or(ChainError::UnknownHeader(earlier_hash))?;

        let actual = parent
            .data
            .timestamp()
            .saturating_sub(earlier.data.timestamp());
        Ok(Some(difficulty::retarget(
            parent.data.difficulty(),
            actual,
            &self.policy,
        )))
    }

    /// Difficulty the next header on the head must declare
    pub fn next_difficulty(&self) -> Result<u32, ChainError> {
        match &self.head {
            Some(head) => Ok(self
                .expected_difficulty(head)?
                .unwrap_or_else(|| head.data.difficulty())),
            None => Ok(Block::genesis().header.difficulty()),
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Push a header. `restart_height` allows replacing the chain with a
    /// single-header chain rooted at `header`, at that height, when it does
    /// not extend the head.
    pub fn push(
        &mut self,
        header: BlockHeader,
        restart_height: Option<u32>,
    ) -> Result<PushOutcome, ChainError> {
        let hash = header.hash();
        if self.path.contains(&hash) {
            return Ok(PushOutcome::Known);
        }

        self.verify_integrity(&header)?;

        if let Some(head) = self.head.as_ref().filter(|h| h.hash() == header.prev_hash()) {
            self.verify_chainability(&header, head)?;
            let entry = ChainEntry::new(header, head.height + 1);
            self.store.put(entry.clone())?;
            self.store.set_main_head(hash)?;
            self.path.push(hash);
            self.head = Some(entry);
            self.emit(HeaderEvent::Extended(hash));
            return Ok(PushOutcome::Extended);
        }

        let parent_height = self.store.get(&header.prev_hash())?.map(|p| p.height + 1);
        let height = parent_height.or(restart_height);
        if let (Some(head), Some(height)) = (&self.head, height) {
            if height <= head.height {
                return Err(ChainError::Stale {
                    height,
                    head: head.height,
                });
            }
        }

        match height.filter(|_| restart_height.is_some()) {
            Some(height) => {
                let entry = ChainEntry::new(header, height);
                self.store.put(entry.clone())?;
                self.store.set_main_head(hash)?;
                self.path = MainPath::from_hashes(vec![hash]);
                self.head = Some(entry);
                log::info!("Proof chain restarted at {} (height {})", hash, height);
                self.emit(HeaderEvent::Restarted(hash));
                Ok(PushOutcome::Restarted)
            }
            None => Err(ChainError::DoesNotChain(hash)),
        }
    }

    /// Push an ordered batch. Headers already on the main path are skipped;
    /// the first new header may restart the chain at `restart_height` plus
    /// its offset in the batch. Stops at the first failure, keeping what was
    /// applied before it. Returns the number of headers applied.
    pub fn push_all(
        &mut self,
        headers: &[BlockHeader],
        restart_height: Option<u32>,
    ) -> Result<usize, ChainError> {
        let skip = headers
            .iter()
            .take_while(|h| self.path.contains(&h.hash()))
            .count();

        let mut applied = 0;
        for (i, header) in headers.iter().enumerate().skip(skip) {
            let restart = if i == skip {
                restart_height.map(|h| h + i as u32)
            } else {
                None
            };
            if self.push(header.clone(), restart)? != PushOutcome::Known {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Demote the head to its parent. Returns false when there was nothing
    /// to revert to and the chain is now empty.
    pub fn revert(&mut self) -> Result<bool, ChainError> {
        let Some(head) = self.head.take() else {
            return Ok(false);
        };
        self.path.pop();

        match self.store.get(&head.data.prev_hash())? {
            Some(parent) => {
                let parent_hash = parent.hash();
                self.store.set_main_head(parent_hash)?;
                if self.path.is_empty() {
                    self.path = load_path(&self.store, parent_hash)?;
                }
                self.head = Some(parent);
                self.emit(HeaderEvent::Reverted(parent_hash));
                Ok(true)
            }
            None => {
                self.store.clear_main_head()?;
                self.path.clear();
                log::warn!("Proof chain reverted past its root {}", head.hash());
                self.emit(HeaderEvent::Reverted(Hash::NULL));
                Ok(false)
            }
        }
    }

    /// Revert until `hash` is the head
    pub fn revert_to(&mut self, hash: &Hash) -> Result<(), ChainError> {
        if !self.path.contains(hash) {
            return Err(ChainError::NotOnMainPath(*hash));
        }
        while self.head_hash() != Some(*hash) {
            if !self.revert()? {
                return Err(ChainError::NotOnMainPath(*hash));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Speculation
    // =========================================================================

    /// Disposable copy whose writes stay in memory until adopted
    pub fn speculate(&self) -> ProofChain<TemporaryChainStore<'_, BlockHeader>> {
        ProofChain {
            store: TemporaryChainStore::new(&self.store),
            path: self.path.clone(),
            head: self.head.clone(),
            policy: self.policy,
            events: None,
        }
    }

    /// Dry run of [`ProofChain::push_all`] that leaves this chain untouched
    pub fn verify_batch(
        &self,
        headers: &[BlockHeader],
        restart_height: Option<u32>,
    ) -> Result<usize, ChainError> {
        self.speculate().push_all(headers, restart_height)
    }

    /// Take over the result of a speculative run
    pub fn adopt(&mut self, speculation: Speculation) -> Result<(), ChainError> {
        self.store.write_batch(speculation.batch)?;
        self.path = speculation.path;
        self.head = speculation.head;
        if let Some(hash) = self.head_hash() {
            self.emit(HeaderEvent::Restarted(hash));
        }
        Ok(())
    }
}

impl ProofChain<TemporaryChainStore<'_, BlockHeader>> {
    /// Finish a speculative run
    pub fn into_speculation(self) -> Speculation {
        Speculation {
            batch: self.store.commit(),
            path: self.path,
            head: self.head,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::HeaderBuilder;
    use crate::crypto::meets_difficulty;
    use crate::storage::PersistentChainStore;
    use tempfile::tempdir;

    /// Mine a header on the head `spacing` seconds after it
    pub(crate) fn mine_on<S: ChainStore<BlockHeader>>(
        chain: &ProofChain<S>,
        spacing: u64,
        seed: u64,
    ) -> BlockHeader {
        let head = chain.head().unwrap().data.clone();
        HeaderBuilder {
            prev_hash: head.hash(),
            body_hash: Hash::digest(&seed.to_be_bytes()),
            accounts_hash: Hash::NULL,
            difficulty: chain.next_difficulty().unwrap(),
            timestamp: head.timestamp() + spacing,
            nonce: 0,
        }
        .mine()
        .0
    }

    /// Grow `chain` by `count` headers and return them
    pub(crate) fn grow<S: ChainStore<BlockHeader>>(
        chain: &mut ProofChain<S>,
        count: usize,
        spacing: u64,
    ) -> Vec<BlockHeader> {
        (0..count)
            .map(|i| {
                let header = mine_on(chain, spacing, i as u64);
                assert_eq!(chain.push(header.clone(), None).unwrap(), PushOutcome::Extended);
                header
            })
            .collect()
    }

    fn chain() -> VolatileProofChain {
        ProofChain::volatile(ChainPolicy::default()).unwrap()
    }

    #[test]
    fn test_push_all_builds_path() {
        let mut source = chain();
        let headers = grow(&mut source, 15, 60);

        let mut chain = chain();
        assert_eq!(chain.push_all(&headers, None).unwrap(), 15);

        let mut expected = vec![Block::genesis_hash()];
        expected.extend(headers.iter().map(|h| h.hash()));
        assert_eq!(chain.path().as_slice(), &expected[..]);
        assert_eq!(chain.height(), 16);
        assert_eq!(chain.path().len() as u32, chain.height());

        // Already-known prefix is skipped
        assert_eq!(chain.push_all(&headers, None).unwrap(), 0);
        assert_eq!(chain.push(headers[3].clone(), None).unwrap(), PushOutcome::Known);
    }

    #[test]
    fn test_proof_of_work_boundary() {
        let chain = chain();
        let mut exact = None;
        let mut short = None;
        let mut builder = HeaderBuilder {
            prev_hash: Block::genesis_hash(),
            body_hash: Hash::NULL,
            accounts_hash: Hash::NULL,
            difficulty: 4,
            timestamp: Block::genesis().header.timestamp() + 60,
            nonce: 0,
        };
        while exact.is_none() || short.is_none() {
            let header = builder.clone().seal();
            match header.hash().leading_zero_bits() {
                4 => exact = Some(header),
                3 => short = Some(header),
                _ => {}
            }
            builder.nonce += 1;
        }

        let exact = exact.unwrap();
        assert!(meets_difficulty(exact.hash().as_bytes(), 4));
        assert!(chain.verify_integrity(&exact).is_ok());

        let short = short.unwrap();
        assert!(matches!(
            chain.verify_integrity(&short),
            Err(ChainError::InvalidProofOfWork { difficulty: 4, .. })
        ));
    }

    #[test]
    fn test_rejects_future_and_backdated_headers() {
        let mut chain = chain();
        grow(&mut chain, 2, 60);

        let head = chain.head().unwrap().data.clone();
        let mut builder = mine_on(&chain, 60, 99).to_builder();
        builder.timestamp = current_timestamp() + 10_000;
        let (future, _) = builder.mine();
        assert!(matches!(
            chain.push(future, None),
            Err(ChainError::FromFuture { .. })
        ));

        let mut builder = mine_on(&chain, 60, 98).to_builder();
        builder.timestamp = head.timestamp() - 1;
        let (backdated, _) = builder.mine();
        assert!(matches!(
            chain.push(backdated, None),
            Err(ChainError::TimestampBeforeParent { .. })
        ));
        assert_eq!(chain.height(), 3);
    }

    #[test]
    fn test_retarget_enforced_at_interval() {
        let mut chain = chain();
        // 30 s blocks: twice as fast as expected
        grow(&mut chain, 19, 30);
        assert_eq!(chain.height(), 20);
        assert_eq!(chain.next_difficulty().unwrap(), 2);

        let mut builder = mine_on(&chain, 30, 1).to_builder();
        builder.difficulty = 1;
        builder.nonce = 0;
        let (wrong, _) = builder.mine();
        assert!(matches!(
            chain.push(wrong, None),
            Err(ChainError::DifficultyMismatch { expected: 2, got: 1 })
        ));

        let right = mine_on(&chain, 30, 2);
        assert_eq!(right.difficulty(), 2);
        assert_eq!(chain.push(right, None).unwrap(), PushOutcome::Extended);
    }

    #[test]
    fn test_retarget_not_enforced_without_history() {
        let mut chain = chain();
        grow(&mut chain, 9, 30);
        assert_eq!(chain.height(), 10);
        let head = chain.head().unwrap().clone();
        assert_eq!(chain.expected_difficulty(&head).unwrap(), None);

        let mut builder = mine_on(&chain, 30, 1).to_builder();
        builder.difficulty = 3;
        let (any, _) = builder.mine();
        assert_eq!(chain.push(any, None).unwrap(), PushOutcome::Extended);
    }

    #[test]
    fn test_revert_to_and_past_root() {
        let mut chain = chain();
        let headers = grow(&mut chain, 7, 60);
        let snapshot: Vec<Hash> = chain.path().as_slice()[..3].to_vec();

        chain.revert_to(&headers[1].hash()).unwrap();
        assert_eq!(chain.path().as_slice(), &snapshot[..]);
        assert_eq!(chain.height(), 3);

        assert!(matches!(
            chain.revert_to(&headers[5].hash()),
            Err(ChainError::NotOnMainPath(_))
        ));

        assert!(chain.revert().unwrap());
        assert!(chain.revert().unwrap());
        assert_eq!(chain.head_hash(), Some(Block::genesis_hash()));
        assert!(!chain.revert().unwrap());
        assert!(chain.path().is_empty());
        assert_eq!(chain.height(), 0);
        assert!(!chain.revert().unwrap());
    }

    #[test]
    fn test_restart_from_recent_headers() {
        let mut source = chain();
        let headers = grow(&mut source, 29, 60);
        assert_eq!(source.height(), 30);

        let tail = &headers[19..];
        let mut light = chain();
        let mut events = light.subscribe();

        // Without restart permission the tail does not chain
        assert!(matches!(
            light.push(tail[0].clone(), None),
            Err(ChainError::DoesNotChain(_))
        ));

        assert_eq!(light.push_all(tail, Some(21)).unwrap(), 10);
        assert_eq!(light.height(), 30);
        assert_eq!(light.path().len(), 10);
        assert_eq!(light.head_hash(), source.head_hash());
        assert_eq!(
            events.try_recv().unwrap(),
            HeaderEvent::Restarted(tail[0].hash())
        );
    }

    #[test]
    fn test_stale_restart_rejected() {
        let mut chain = chain();
        grow(&mut chain, 10, 60);

        let mut other = ProofChain::volatile(ChainPolicy::default()).unwrap();
        let fork = grow(&mut other, 3, 61);
        let before = chain.path().clone();
        assert!(matches!(
            chain.push(fork[2].clone(), Some(4)),
            Err(ChainError::Stale { height: 4, head: 11 })
        ));
        assert_eq!(chain.path(), &before);
    }

    #[test]
    fn test_speculation_isolated_until_adopted() {
        let mut source = chain();
        let headers = grow(&mut source, 5, 60);

        let mut chain = chain();
        assert_eq!(chain.verify_batch(&headers, None).unwrap(), 5);
        assert_eq!(chain.height(), 1);

        let speculation = {
            let mut trial = chain.speculate();
            trial.push_all(&headers, None).unwrap();
            trial.into_speculation()
        };
        assert!(chain.get(&headers[0].hash()).unwrap().is_none());

        chain.adopt(speculation).unwrap();
        assert_eq!(chain.height(), 6);
        assert_eq!(chain.head_hash(), source.head_hash());
        assert!(chain.get(&headers[4].hash()).unwrap().is_some());
    }

    #[test]
    fn test_persistent_reload() {
        let dir = tempdir().unwrap();
        let headers = {
            let store = PersistentChainStore::open(dir.path()).unwrap();
            let mut chain = ProofChain::new(store, ChainPolicy::default()).unwrap();
            grow(&mut chain, 4, 60)
        };

        let store = PersistentChainStore::<BlockHeader>::open(dir.path()).unwrap();
        let chain = ProofChain::new(store, ChainPolicy::default()).unwrap();
        assert_eq!(chain.height(), 5);
        assert_eq!(chain.head_hash(), Some(headers[3].hash()));
        assert_eq!(chain.path().first(), Some(Block::genesis_hash()));
    }
}
