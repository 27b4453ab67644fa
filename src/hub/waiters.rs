//! Waiter set for pending progress waits.
//!
//! Tracks every registered wait by `(target, id)` so that an advance can
//! release a whole prefix of targets at once, while a single waiter can still
//! remove itself on cancellation.

use std::collections::BTreeMap;
use tokio::sync::oneshot;

use crate::error::HubError;

/// Resolution delivered to a pending waiter.
pub(crate) type Outcome = Result<(), HubError>;

/// Key identifying one registered wait.
///
/// Ordered by target first, so every waiter satisfied by a given progress
/// value sits in a contiguous prefix of the set.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct WaiterKey {
    pub target: u64,
    pub id: u64,
}

/// Outstanding waiters, each holding the sending half of its wake signal.
///
/// Removing a key is what resolves a waiter: whoever takes the entry out of
/// the set owns the outcome, every later attempt finds nothing.
#[derive(Debug, Default)]
pub(crate) struct WaiterSet {
    pending: BTreeMap<WaiterKey, oneshot::Sender<Outcome>>,
    next_id: u64,
}

impl WaiterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `target`.
    ///
    /// Returns the key to deregister with and the receiver the outcome
    /// arrives on.
    pub fn insert(&mut self, target: u64) -> (WaiterKey, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let key = WaiterKey {
            target,
            id: self.next_id,
        };
        self.next_id = self.next_id.wrapping_add(1);
        self.pending.insert(key, tx);
        (key, rx)
    }

    /// Remove a waiter without resolving it.
    ///
    /// Returns false if the waiter was already resolved by someone else.
    pub fn remove(&mut self, key: &WaiterKey) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Release every waiter whose target is at most `done_upto`.
    ///
    /// Returns the number of waiters released.
    pub fn release_upto(&mut self, done_upto: u64) -> usize {
        let still_pending = match done_upto.checked_add(1) {
            Some(next) => self.pending.split_off(&WaiterKey { target: next, id: 0 }),
            None => BTreeMap::new(),
        };
        let released = std::mem::replace(&mut self.pending, still_pending);
        Self::resolve_all(released, || Ok(()))
    }

    /// Resolve every waiter with `AlreadyClosed`, leaving the set empty.
    pub fn drain_closed(&mut self) -> usize {
        let drained = std::mem::take(&mut self.pending);
        Self::resolve_all(drained, || Err(HubError::AlreadyClosed))
    }

    fn resolve_all(
        waiters: BTreeMap<WaiterKey, oneshot::Sender<Outcome>>,
        outcome: impl Fn() -> Outcome,
    ) -> usize {
        let count = waiters.len();
        for (_, tx) in waiters {
            // Receiver dropped means the wait future was dropped; nothing to wake
            let _ = tx.send(outcome());
        }
        count
    }

    /// Number of outstanding waiters.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Smallest target any waiter is blocked on.
    pub fn lowest_target(&self) -> Option<u64> {
        self.pending.keys().next().map(|key| key.target)
    }
}
