//! Tidemark: a bounded, cancellable progress barrier.
//!
//! A [`ProgressHub`] tracks one monotonically increasing progress marker,
//! such as a log's commit index or a pipeline's flush counter, and lets any
//! number of tasks wait until it reaches a target.
//!
//! # Architecture
//!
//! - **Single critical section**: progress, waiters and the closed latch share one lock
//! - **Bounded**: at most `max_waiters` tasks are blocked at once
//! - **Cancellable**: waits end on a `CancellationToken`, a deadline or a timeout
//! - **Terminal close**: closing fails every pending and later call
//!
//! # Modules
//!
//! - [`config`]: Hub settings and CLI configuration
//! - [`error`]: Error types
//! - [`hub`]: The progress hub
//! - [`observability`]: Metrics and tracing setup
//! - [`soak`]: Concurrent soak driver
//!
//! # Example
//!
//! ```
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//! use tidemark::{CancellationToken, ProgressHub};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hub = Arc::new(ProgressHub::new(0, NonZeroUsize::new(16).unwrap()));
//!
//! let committer = hub.clone();
//! tokio::spawn(async move { committer.advance_to(42).unwrap() });
//!
//! hub.wait_for(42, &CancellationToken::new()).await.unwrap();
//! assert!(hub.status().unwrap().done_upto >= 42);
//! # }
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // hub::HubStatus is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc       // Panic docs can be verbose
)]

pub mod config;
pub mod error;
pub mod hub;
pub mod observability;
pub mod soak;

pub use config::HubConfig;
pub use error::{ConfigError, HubError};
pub use hub::{HubStatus, ProgressHub};
pub use tokio_util::sync::CancellationToken;
