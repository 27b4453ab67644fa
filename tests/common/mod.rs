//! Shared helpers for hub integration tests.
//!
//! Provides:
//! - Hub construction shorthand with tracing and metrics installed
//! - Polling helper for waiting on hub state

#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tidemark::observability::{metrics::init_metrics, tracing::init_test_tracing};
use tidemark::{HubStatus, ProgressHub};

/// Create a shared hub starting at `initial` with room for `capacity` waiters.
///
/// Also installs test tracing and metrics so hub instrumentation runs.
pub fn shared_hub(initial: u64, capacity: usize) -> Arc<ProgressHub> {
    init_test_tracing();
    init_metrics();
    let capacity = NonZeroUsize::new(capacity).expect("capacity must be positive");
    Arc::new(ProgressHub::new(initial, capacity))
}

/// Current status of an open hub.
pub fn status(hub: &ProgressHub) -> HubStatus {
    hub.status().expect("hub should be open")
}

/// Wait for a condition to become true with timeout.
///
/// # Arguments
///
/// * `timeout` - Maximum time to wait
/// * `condition` - Closure that returns true when condition is met
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    false
}

/// Wait until exactly `count` waiters are registered on `hub`.
pub async fn wait_for_waiting(hub: &ProgressHub, count: usize) -> bool {
    wait_for(Duration::from_secs(5), || {
        hub.status().map(|s| s.waiting == count).unwrap_or(false)
    })
    .await
}
