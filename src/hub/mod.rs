//! Progress hub: wait until a monotonically advancing marker reaches a target.
//!
//! A producer (commit pipeline, flusher, replicator) calls
//! [`ProgressHub::advance_to`] as its progress moves forward; any number of
//! tasks call [`ProgressHub::wait_for`] to block until everything up to their
//! target is done. The hub bounds how many waiters may be blocked at once and
//! can be closed exactly once, which fails every pending and future call.
//!
//! All state lives behind one mutex so that "check progress, else register"
//! is a single critical section and no advance can slip in between.

mod waiters;

use opentelemetry::KeyValue;
use serde::Serialize;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;
use crate::observability::metrics;
use waiters::{Outcome, WaiterKey, WaiterSet};

/// Hub name used for metrics and logs when none is configured.
pub const DEFAULT_HUB_NAME: &str = "progress";

/// Consistent snapshot of a hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HubStatus {
    /// Everything up to and including this value is done.
    pub done_upto: u64,
    /// Number of registered waiters still blocked.
    pub waiting: usize,
}

#[derive(Debug)]
struct HubState {
    done_upto: u64,
    waiters: WaiterSet,
    closed: bool,
}

impl HubState {
    fn check_invariants(&self) {
        debug_assert!(
            self.waiters
                .lowest_target()
                .map_or(true, |target| target > self.done_upto),
            "satisfied waiter left in the set"
        );
        debug_assert!(
            !self.closed || self.waiters.is_empty(),
            "closed hub still holds waiters"
        );
    }
}

/// Bounded, cancellable barrier over a monotonically increasing progress marker.
///
/// Share it with `Arc<ProgressHub>` between the side that advances progress
/// and the sides that wait on it.
#[derive(Debug)]
pub struct ProgressHub {
    name: String,
    metric_attr: KeyValue,
    capacity: usize,
    state: Mutex<HubState>,
}

impl ProgressHub {
    /// Create a hub starting at `initial` that admits at most `max_waiters`
    /// concurrently blocked waiters.
    pub fn new(initial: u64, max_waiters: NonZeroUsize) -> Self {
        Self::named(DEFAULT_HUB_NAME, initial, max_waiters)
    }

    /// Create a hub labelled `name` in logs and metrics.
    pub fn named(name: impl Into<String>, initial: u64, max_waiters: NonZeroUsize) -> Self {
        let name = name.into();
        Self {
            metric_attr: metrics::hub_attribute(&name),
            name,
            capacity: max_waiters.get(),
            state: Mutex::new(HubState {
                done_upto: initial,
                waiters: WaiterSet::new(),
                closed: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of concurrently blocked waiters.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether [`close`](Self::close) has succeeded.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // No code panics while the state is half-updated, so a poisoned lock
    // still guards consistent state.
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance progress to `target`, releasing every waiter it satisfies.
    ///
    /// Values at or below the current progress are accepted and ignored, so
    /// duplicate or out-of-order advances are harmless. Never blocks on the
    /// released waiters.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyClosed`] once the hub has been closed.
    pub fn advance_to(&self, target: u64) -> Result<(), HubError> {
        let mut state = self.lock();
        if state.closed {
            return Err(HubError::AlreadyClosed);
        }
        if target <= state.done_upto {
            return Ok(());
        }

        state.done_upto = target;
        let released = state.waiters.release_upto(target);
        let waiting = state.waiters.len();
        state.check_invariants();
        drop(state);
        metrics::record_advance(&self.metric_attr, target, released, waiting);

        tracing::debug!(
            hub = %self.name,
            done_upto = target,
            released,
            waiting,
            "Progress advanced"
        );
        Ok(())
    }

    /// Wait until progress reaches `target` or `cancel` is triggered.
    ///
    /// Returns immediately, without taking a waiter slot, if progress is
    /// already at or past `target`. A waiter that is satisfied before the
    /// token fires always resolves as success.
    ///
    /// Dropping the returned future deregisters the waiter.
    ///
    /// # Errors
    ///
    /// - [`HubError::AlreadyClosed`] if the hub is or becomes closed.
    /// - [`HubError::MaxWaitersExceeded`] if every waiter slot is taken.
    /// - [`HubError::CancellationRequested`] if `cancel` fired first.
    pub async fn wait_for(&self, target: u64, cancel: &CancellationToken) -> Result<(), HubError> {
        self.wait_until(target, cancel.cancelled()).await
    }

    /// Like [`wait_for`](Self::wait_for), cancelled once `deadline` passes.
    pub async fn wait_for_deadline(&self, target: u64, deadline: Instant) -> Result<(), HubError> {
        self.wait_until(target, tokio::time::sleep_until(deadline))
            .await
    }

    /// Like [`wait_for`](Self::wait_for), cancelled after `timeout`.
    pub async fn wait_for_timeout(&self, target: u64, timeout: Duration) -> Result<(), HubError> {
        self.wait_until(target, tokio::time::sleep(timeout)).await
    }

    async fn wait_until<F>(&self, target: u64, cancelled: F) -> Result<(), HubError>
    where
        F: Future<Output = ()>,
    {
        let mut pending = match self.register(target) {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                metrics::record_wait_outcome(&self.metric_attr, "immediate", None);
                return Ok(());
            }
            Err(err) => {
                metrics::record_wait_outcome(&self.metric_attr, err.outcome_label(), None);
                return Err(err);
            }
        };

        // Polling the wake signal first makes an already-delivered outcome
        // win over a cancellation that fired in the same instant.
        let delivered = tokio::select! {
            biased;
            delivered = &mut pending.rx => Some(delivered),
            () = cancelled => None,
        };
        let outcome = match delivered {
            Some(delivered) => pending.delivered(delivered),
            None => pending.cancel(),
        };

        let label = match &outcome {
            Ok(()) => "satisfied",
            Err(err) => err.outcome_label(),
        };
        metrics::record_wait_outcome(
            &self.metric_attr,
            label,
            Some(pending.registered_at.elapsed().as_secs_f64()),
        );
        outcome
    }

    /// Check-and-register under one lock.
    ///
    /// `Ok(None)` means the target is already satisfied.
    fn register(&self, target: u64) -> Result<Option<PendingWait<'_>>, HubError> {
        let mut state = self.lock();
        if state.closed {
            return Err(HubError::AlreadyClosed);
        }
        if state.done_upto >= target {
            return Ok(None);
        }
        if state.waiters.len() >= self.capacity {
            drop(state);
            tracing::debug!(
                hub = %self.name,
                target,
                capacity = self.capacity,
                "Max waiters exceeded, rejecting wait"
            );
            return Err(HubError::MaxWaitersExceeded {
                capacity: self.capacity,
            });
        }

        let (key, rx) = state.waiters.insert(target);
        let waiting = state.waiters.len();
        drop(state);
        metrics::record_waiting(&self.metric_attr, waiting);

        tracing::trace!(hub = %self.name, target, waiting, "Waiter registered");
        Ok(Some(PendingWait {
            hub: self,
            key,
            rx,
            registered_at: Instant::now(),
            resolved: false,
        }))
    }

    /// Snapshot progress and the number of blocked waiters.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyClosed`] once the hub has been closed.
    pub fn status(&self) -> Result<HubStatus, HubError> {
        let state = self.lock();
        if state.closed {
            return Err(HubError::AlreadyClosed);
        }
        Ok(HubStatus {
            done_upto: state.done_upto,
            waiting: state.waiters.len(),
        })
    }

    /// Close the hub, failing every blocked waiter with
    /// [`HubError::AlreadyClosed`].
    ///
    /// Every later call on the hub, including another `close`, fails with
    /// `AlreadyClosed`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyClosed`] if the hub was already closed.
    pub fn close(&self) -> Result<(), HubError> {
        let mut state = self.lock();
        if state.closed {
            return Err(HubError::AlreadyClosed);
        }

        state.closed = true;
        let drained = state.waiters.drain_closed();
        let done_upto = state.done_upto;
        state.check_invariants();
        drop(state);
        metrics::record_waiting(&self.metric_attr, 0);

        tracing::info!(hub = %self.name, done_upto, drained, "Progress hub closed");
        Ok(())
    }
}

/// A registered wait that has not resolved yet.
///
/// Dropping it unresolved removes the waiter from the hub, returning its slot.
struct PendingWait<'a> {
    hub: &'a ProgressHub,
    key: WaiterKey,
    rx: oneshot::Receiver<Outcome>,
    registered_at: Instant,
    resolved: bool,
}

impl PendingWait<'_> {
    /// The hub resolved this waiter through its wake signal.
    fn delivered(&mut self, delivered: Result<Outcome, oneshot::error::RecvError>) -> Outcome {
        self.resolved = true;
        // Senders live in the hub, which outlives this borrow
        delivered.unwrap_or(Err(HubError::AlreadyClosed))
    }

    /// The cancellation signal fired; resolve unless the hub got here first.
    fn cancel(&mut self) -> Outcome {
        self.resolved = true;

        let mut state = self.hub.lock();
        if state.waiters.remove(&self.key) {
            let waiting = state.waiters.len();
            drop(state);
            metrics::record_waiting(&self.hub.metric_attr, waiting);

            tracing::debug!(
                hub = %self.hub.name,
                target = self.key.target,
                waiting,
                "Wait cancelled"
            );
            return Err(HubError::CancellationRequested);
        }
        drop(state);

        // Advance and close send while holding the lock, so a missing key
        // means the outcome is already in the channel.
        self.rx
            .try_recv()
            .unwrap_or(Err(HubError::AlreadyClosed))
    }
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        let mut state = self.hub.lock();
        if state.waiters.remove(&self.key) {
            let waiting = state.waiters.len();
            drop(state);
            metrics::record_waiting(&self.hub.metric_attr, waiting);

            tracing::trace!(
                hub = %self.hub.name,
                target = self.key.target,
                waiting,
                "Dropped wait deregistered"
            );
        }
    }
}
