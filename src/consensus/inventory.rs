//! Per-peer inventory bookkeeping
//!
//! Tracks which objects the peer already knows, queues unknown vectors for
//! download and holds at most one getdata batch in flight.

use crate::core::InvVector;
use std::collections::HashSet;

/// What the caller should do after queueing vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    /// Nothing new was queued
    Nothing,
    /// Threshold reached; request immediately
    RequestNow,
    /// Wait for the throttle timer to coalesce more vectors
    Throttle,
}

/// Result of accounting a received object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Not part of the in-flight batch
    Unsolicited,
    MoreExpected,
    /// Last outstanding object of the batch arrived
    BatchComplete,
}

#[derive(Debug)]
pub struct InventoryExchange {
    known: HashSet<InvVector>,
    queue: Vec<InvVector>,
    queued: HashSet<InvVector>,
    in_flight: Option<HashSet<InvVector>>,
    threshold: usize,
}

impl InventoryExchange {
    pub fn new(threshold: usize) -> Self {
        Self {
            known: HashSet::new(),
            queue: Vec::new(),
            queued: HashSet::new(),
            in_flight: None,
            threshold: threshold.max(1),
        }
    }

    /// Record that the peer knows `vector`
    pub fn mark_known(&mut self, vector: InvVector) {
        self.known.insert(vector);
    }

    pub fn is_known(&self, vector: &InvVector) -> bool {
        self.known.contains(vector)
    }

    /// Queue vectors the local node lacks. Vectors already queued or in
    /// flight are skipped.
    pub fn queue(&mut self, unknown: impl IntoIterator<Item = InvVector>) -> QueueAction {
        let mut added = 0;
        for vector in unknown {
            let in_flight = self
                .in_flight
                .as_ref()
                .is_some_and(|batch| batch.contains(&vector));
            if in_flight || !self.queued.insert(vector) {
                continue;
            }
            self.queue.push(vector);
            added += 1;
        }

        if added == 0 {
            QueueAction::Nothing
        } else if self.queue.len() >= self.threshold {
            QueueAction::RequestNow
        } else {
            QueueAction::Throttle
        }
    }

    /// Move the whole queue into flight. `None` while a batch is already in
    /// flight or nothing is queued.
    pub fn take_batch(&mut self) -> Option<Vec<InvVector>> {
        if self.in_flight.is_some() || self.queue.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.queue);
        self.queued.clear();
        self.in_flight = Some(batch.iter().copied().collect());
        Some(batch)
    }

    /// Account an object received from the peer
    pub fn object_received(&mut self, vector: &InvVector) -> ReceiveOutcome {
        self.known.insert(*vector);
        match self.in_flight.as_mut() {
            Some(batch) if batch.contains(vector) => {
                batch.remove(vector);
                if batch.is_empty() {
                    ReceiveOutcome::BatchComplete
                } else {
                    ReceiveOutcome::MoreExpected
                }
            }
            _ => ReceiveOutcome::Unsolicited,
        }
    }

    /// Drop the in-flight batch, returning the vectors still outstanding
    pub fn finish_batch(&mut self) -> Vec<InvVector> {
        self.in_flight
            .take()
            .map(|batch| batch.into_iter().collect())
            .unwrap_or_default()
    }

    /// Whether `vector` belongs to the batch in flight
    pub fn is_requested(&self, vector: &InvVector) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|batch| batch.contains(vector))
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
