//! Main path bookkeeping and block locators

use crate::crypto::Hash;
use crate::storage::{ChainData, ChainStore, StoreError};
use std::collections::HashMap;

/// Number of most recent hashes included contiguously in a locator
pub const LOCATOR_DENSE_COUNT: usize = 10;

/// Ordered hashes of the active chain with constant-time position lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainPath {
    hashes: Vec<Hash>,
    index: HashMap<Hash, usize>,
}

impl MainPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_hashes(hashes: Vec<Hash>) -> Self {
        let index = hashes.iter().enumerate().map(|(i, h)| (*h, i)).collect();
        Self { hashes, index }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn position(&self, hash: &Hash) -> Option<usize> {
        self.index.get(hash).copied()
    }

    pub fn get(&self, i: usize) -> Option<Hash> {
        self.hashes.get(i).copied()
    }

    pub fn first(&self) -> Option<Hash> {
        self.hashes.first().copied()
    }

    pub fn last(&self) -> Option<Hash> {
        self.hashes.last().copied()
    }

    pub fn push(&mut self, hash: Hash) {
        self.index.insert(hash, self.hashes.len());
        self.hashes.push(hash);
    }

    pub fn pop(&mut self) -> Option<Hash> {
        let hash = self.hashes.pop()?;
        self.index.remove(&hash);
        Some(hash)
    }

    /// Keep only the first `len` hashes
    pub fn truncate(&mut self, len: usize) {
        while self.hashes.len() > len {
            self.pop();
        }
    }

    pub fn clear(&mut self) {
        self.hashes.clear();
        self.index.clear();
    }

    pub fn as_slice(&self) -> &[Hash] {
        &self.hashes
    }

    /// Block locator: the ten most recent hashes, then exponentially
    /// spaced ones, always ending with `genesis`.
    pub fn locator(&self, genesis: Hash) -> Vec<Hash> {
        let mut hashes = Vec::new();
        let mut step = 1usize;
        let mut i = self.hashes.len();
        while i > 0 {
            let hash = self.hashes[i - 1];
            if hash == genesis {
                break;
            }
            hashes.push(hash);
            if hashes.len() >= LOCATOR_DENSE_COUNT {
                step *= 2;
            }
            i = i.saturating_sub(step);
        }
        hashes.push(genesis);
        hashes
    }

    /// Index after which a locator response starts.
    ///
    /// Genesis is an immediate match. Otherwise the first locator hash on
    /// this path wins. Without a match the response starts at the root of
    /// the path.
    pub fn locate(&self, locators: &[Hash], genesis: Hash) -> Option<usize> {
        for hash in locators {
            if *hash == genesis {
                return self.position(&genesis);
            }
            if let Some(i) = self.position(hash) {
                return Some(i);
            }
        }
        self.position(&genesis)
    }

    /// Range of path indices to return for a locator request.
    ///
    /// `matched` is the result of [`MainPath::locate`]. The range never
    /// extends past a `stop` hash positioned after the match, and holds at
    /// most `max` entries. In reverse mode the range ends at the stop point
    /// (or the head) and covers the last `max` entries after the match.
    pub fn response_range(
        &self,
        matched: Option<usize>,
        stop: &Hash,
        max: usize,
        reverse: bool,
    ) -> std::ops::Range<usize> {
        let start = matched.map(|i| i + 1).unwrap_or(0);
        let end = match self.position(stop) {
            Some(s) if s >= start => s + 1,
            _ => self.hashes.len(),
        };
        if start >= end {
            return start..start;
        }
        if reverse {
            end.saturating_sub(max).max(start)..end
        } else {
            start..end.min(start + max)
        }
    }
}

/// Walk back from `head` through the store while parents are known.
pub fn load_path<T: ChainData, S: ChainStore<T> + ?Sized>(
    store: &S,
    head: Hash,
) -> Result<MainPath, StoreError> {
    let mut hashes = Vec::new();
    let mut cursor = Some(head);
    while let Some(hash) = cursor {
        match store.get(&hash)? {
            Some(entry) => {
                hashes.push(hash);
                let prev = entry.data.prev_hash();
                cursor = if prev.is_null() { None } else { Some(prev) };
            }
            None => cursor = None,
        }
    }
    hashes.reverse();
    Ok(MainPath::from_hashes(hashes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(n: usize) -> (MainPath, Vec<Hash>) {
        let hashes: Vec<Hash> = (0..n)
            .map(|i| Hash::digest(&(i as u64).to_be_bytes()))
            .collect();
        (MainPath::from_hashes(hashes.clone()), hashes)
    }

    #[test]
    fn test_locator_shape() {
        let (path, hashes) = path(1000);
        let genesis = hashes[0];
        let locator = path.locator(genesis);

        assert_eq!(&locator[..10], &hashes[990..].iter().rev().copied().collect::<Vec<_>>()[..]);
        assert_eq!(locator[10], hashes[1000 - 1 - 9 - 2]);
        assert_eq!(*locator.last().unwrap(), genesis);
        assert_eq!(locator.iter().filter(|h| **h == genesis).count(), 1);
        assert!(locator.len() < 30);
    }

    #[test]
    fn test_locate_prefers_first_on_path() {
        let (path, hashes) = path(20);
        let unknown = Hash::digest(b"elsewhere");
        assert_eq!(path.locate(&[unknown, hashes[12], hashes[5]], hashes[0]), Some(12));
        assert_eq!(path.locate(&[unknown], hashes[0]), Some(0));
        assert_eq!(path.locate(&[hashes[0], hashes[12]], hashes[0]), Some(0));

        // Light path not rooted at genesis
        let light = MainPath::from_hashes(hashes[5..].to_vec());
        assert_eq!(light.locate(&[unknown], hashes[0]), None);
    }

    #[test]
    fn test_response_range() {
        let (path, hashes) = path(1000);
        assert_eq!(path.response_range(Some(0), &Hash::NULL, 500, false), 1..501);
        assert_eq!(path.response_range(Some(900), &Hash::NULL, 500, false), 901..1000);
        assert_eq!(path.response_range(Some(10), &hashes[20], 500, false), 11..21);
        // Stop before the match is ignored
        assert_eq!(path.response_range(Some(10), &hashes[5], 5, false), 11..16);
        assert_eq!(path.response_range(Some(0), &Hash::NULL, 500, true), 500..1000);
        assert_eq!(path.response_range(Some(800), &Hash::NULL, 500, true), 801..1000);
        assert_eq!(path.response_range(Some(999), &Hash::NULL, 500, false), 1000..1000);
        assert_eq!(path.response_range(None, &Hash::NULL, 3, false), 0..3);
    }

    #[test]
    fn test_push_pop_truncate() {
        let (mut path, hashes) = path(5);
        assert_eq!(path.pop(), Some(hashes[4]));
        assert!(!path.contains(&hashes[4]));
        path.truncate(2);
        assert_eq!(path.as_slice(), &hashes[..2]);
        path.push(hashes[4]);
        assert_eq!(path.position(&hashes[4]), Some(2));
    }
}
