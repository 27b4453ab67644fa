//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing setup
//! - OpenTelemetry metrics for hub operations

pub mod metrics;
pub mod tracing;
