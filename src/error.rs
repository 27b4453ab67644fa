//! Error types for the progress hub.

use thiserror::Error;

/// Error returned by [`ProgressHub`](crate::ProgressHub) operations.
///
/// None of these indicate a bug in the hub; they are expected outcomes the
/// caller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub has been closed. Terminal: stop using the hub.
    #[error("progress hub already closed")]
    AlreadyClosed,

    /// Every waiter slot is taken. The wait was never registered.
    #[error("max waiters limit exceeded (capacity {capacity})")]
    MaxWaitersExceeded { capacity: usize },

    /// The caller's cancellation signal fired before the target was reached.
    #[error("cancellation requested before target was reached")]
    CancellationRequested,
}

impl HubError {
    /// Whether retrying the same call later can succeed.
    ///
    /// Only capacity exhaustion is transient; a closed hub stays closed and
    /// cancellation is the caller's own decision.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MaxWaitersExceeded { .. })
    }

    /// Short label used for the `outcome` metrics attribute.
    pub(crate) fn outcome_label(&self) -> &'static str {
        match self {
            Self::AlreadyClosed => "closed",
            Self::MaxWaitersExceeded { .. } => "rejected",
            Self::CancellationRequested => "cancelled",
        }
    }
}

/// Error type for hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max waiters must be positive")]
    ZeroCapacity,

    #[error("hub name must not be empty")]
    EmptyName,
}
