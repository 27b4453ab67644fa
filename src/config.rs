//! Configuration for hubs and the soak driver.
//!
//! Supports:
//! - Library-side [`HubConfig`] with validation
//! - CLI arguments via clap for the `tidemark` binary
//! - Environment variable overrides

use clap::{Parser, ValueEnum};
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::ConfigError;
use crate::hub::{ProgressHub, DEFAULT_HUB_NAME};
use crate::soak::SoakConfig;

/// Settings for constructing a [`ProgressHub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Label used in logs and metrics
    pub name: String,
    /// Progress value the hub starts at
    pub initial_progress: u64,
    /// Maximum number of concurrently blocked waiters
    pub max_waiters: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_HUB_NAME.into(),
            initial_progress: 0,
            max_waiters: 1024,
        }
    }
}

impl HubConfig {
    /// Check the settings without building a hub.
    pub fn validate(&self) -> Result<NonZeroUsize, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        NonZeroUsize::new(self.max_waiters).ok_or(ConfigError::ZeroCapacity)
    }

    /// Build a hub from these settings.
    pub fn build(&self) -> Result<ProgressHub, ConfigError> {
        let max_waiters = self.validate()?;
        Ok(ProgressHub::named(
            self.name.clone(),
            self.initial_progress,
            max_waiters,
        ))
    }
}

/// Console log format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Soak summary output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Tidemark: soak a progress hub with a simulated commit pipeline.
#[derive(Parser, Debug, Clone)]
#[command(name = "tidemark")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Progress value the hub starts at
    #[arg(long, env = "TIDEMARK_INITIAL_PROGRESS", default_value_t = 0)]
    pub initial_progress: u64,

    /// Maximum number of concurrently blocked waiters
    #[arg(short = 'm', long, env = "TIDEMARK_MAX_WAITERS", default_value_t = 1024)]
    pub max_waiters: usize,

    /// Number of concurrent waiting tasks
    #[arg(short, long, env = "TIDEMARK_TASKS", default_value_t = 64)]
    pub tasks: usize,

    /// Waits issued by each task
    #[arg(long, env = "TIDEMARK_WAITS_PER_TASK", default_value_t = 100)]
    pub waits_per_task: u64,

    /// Width of the wait target window, centred on current progress
    #[arg(long, env = "TIDEMARK_MAX_LEAD", default_value_t = 8)]
    pub max_lead: u64,

    /// Interval between producer advances, in milliseconds
    #[arg(long, env = "TIDEMARK_ADVANCE_INTERVAL_MS", default_value_t = 1)]
    pub advance_interval_ms: u64,

    /// Per-wait timeout, in milliseconds
    #[arg(long, env = "TIDEMARK_WAIT_TIMEOUT_MS", default_value_t = 5)]
    pub wait_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Console log format
    #[arg(long, env = "TIDEMARK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Summary output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Hub settings for the soaked hub.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            name: "soak".into(),
            initial_progress: self.initial_progress,
            max_waiters: self.max_waiters,
        }
    }

    /// Load settings for the soak driver.
    pub fn soak_config(&self) -> SoakConfig {
        SoakConfig {
            hub: self.hub_config(),
            tasks: self.tasks,
            waits_per_task: self.waits_per_task,
            max_lead: self.max_lead,
            advance_interval: Duration::from_millis(self.advance_interval_ms.max(1)),
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
        }
    }

    /// Create a small, fast configuration for testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            tasks: 4,
            waits_per_task: 10,
            max_waiters: 8,
            log_level: "debug".into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_progress: 0,
            max_waiters: 1024,
            tasks: 64,
            waits_per_task: 100,
            max_lead: 8,
            advance_interval_ms: 1,
            wait_timeout_ms: 5,
            log_level: "info".into(),
            log_format: LogFormat::Text,
            output: OutputFormat::Text,
            otel_endpoint: None,
        }
    }
}
