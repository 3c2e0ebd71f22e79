//! Named one-shot timers for a sync agent
//!
//! Each timer is a spawned sleep that posts `(kind, generation)` back over a
//! channel. Setting a kind twice is refused, so a live timer doubles as the
//! single-outstanding-request guard for that kind. Firings from a cleared or
//! replaced timer carry a stale generation and are rejected by
//! [`Timers::accept`].

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Throttle before flushing queued inventory
    Inv,
    GetData,
    GetBlocks,
    GetHeaders,
    GetAccounts,
}

pub type TimerFired = (TimerKind, u64);

pub struct Timers {
    tx: mpsc::UnboundedSender<TimerFired>,
    active: HashMap<TimerKind, (u64, JoinHandle<()>)>,
    generation: u64,
}

impl Timers {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timers = Self {
            tx,
            active: HashMap::new(),
            generation: 0,
        };
        (timers, rx)
    }

    /// Start `kind` unless it is already running. Returns whether it started.
    pub fn set(&mut self, kind: TimerKind, delay: Duration) -> bool {
        if self.exists(kind) {
            return false;
        }
        self.start(kind, delay);
        true
    }

    /// Start `kind`, replacing a running one
    pub fn reset(&mut self, kind: TimerKind, delay: Duration) {
        self.clear(kind);
        self.start(kind, delay);
    }

    fn start(&mut self, kind: TimerKind, delay: Duration) {
        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send((kind, generation));
        });
        self.active.insert(kind, (generation, handle));
    }

    pub fn clear(&mut self, kind: TimerKind) {
        if let Some((_, handle)) = self.active.remove(&kind) {
            handle.abort();
        }
    }

    pub fn exists(&self, kind: TimerKind) -> bool {
        self.active.contains_key(&kind)
    }

    /// Consume a firing. True if it belongs to the live timer of its kind,
    /// which is then no longer running.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        let (kind, generation) = fired;
        match self.active.get(&kind) {
            Some((live, _)) if *live == generation => {
                self.active.remove(&kind);
                true
            }
            _ => false,
        }
    }

    pub fn clear_all(&mut self) {
        for (_, (_, handle)) in self.active.drain() {
            handle.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timer_fires_once() {
        let (mut timers, mut rx) = Timers::new();
        assert!(timers.set(TimerKind::GetData, Duration::from_millis(10)));
        assert!(!timers.set(TimerKind::GetData, Duration::from_millis(10)));
        assert!(timers.exists(TimerKind::GetData));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.0, TimerKind::GetData);
        assert!(timers.accept(fired));
        assert!(!timers.exists(TimerKind::GetData));
        assert!(!timers.accept(fired));
    }

    #[tokio::test]
    async fn test_reset_discards_old_generation() {
        let (mut timers, mut rx) = Timers::new();
        timers.set(TimerKind::Inv, Duration::from_millis(5));
        let old = timers.generation;
        timers.reset(TimerKind::Inv, Duration::from_millis(20));

        assert!(!timers.accept((TimerKind::Inv, old)));
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, (TimerKind::Inv, old + 1));
        assert!(timers.accept(fired));
    }

    #[tokio::test]
    async fn test_clear_cancels() {
        let (mut timers, mut rx) = Timers::new();
        timers.set(TimerKind::GetHeaders, Duration::from_millis(5));
        timers.set(TimerKind::GetAccounts, Duration::from_millis(5));
        timers.clear_all();
        assert!(!timers.exists(TimerKind::GetHeaders));

        let waited = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(waited.is_err());
    }
}
