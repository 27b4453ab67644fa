//! Soak driver for a progress hub.
//!
//! Runs a producer that advances progress on a fixed interval, the way a
//! commit pipeline would after each group commit, against a pool of tasks
//! that repeatedly wait for targets around the current progress with a
//! timeout. Every cancelled wait is checked against the progress sampled
//! before it started: a wait whose target was already reached must never
//! come back cancelled.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::error::HubError;
use crate::hub::ProgressHub;

/// Settings for one soak run.
#[derive(Debug, Clone)]
pub struct SoakConfig {
    /// Hub under test
    pub hub: HubConfig,
    /// Number of concurrent waiting tasks
    pub tasks: usize,
    /// Waits issued by each task
    pub waits_per_task: u64,
    /// Width of the target window, centred on current progress
    pub max_lead: u64,
    /// Time between producer advances
    pub advance_interval: Duration,
    /// Timeout applied to every wait
    pub wait_timeout: Duration,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig {
                name: "soak".into(),
                ..HubConfig::default()
            },
            tasks: 64,
            waits_per_task: 100,
            max_lead: 8,
            advance_interval: Duration::from_millis(1),
            wait_timeout: Duration::from_millis(5),
        }
    }
}

/// How the waits of a soak run resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WaitTally {
    /// Target already reached when the wait started
    pub immediate: u64,
    /// Released by a later advance
    pub satisfied: u64,
    /// Timed out before the target was reached
    pub cancelled: u64,
    /// Turned away because every waiter slot was taken
    pub rejected: u64,
    /// Ended by the hub closing
    pub closed: u64,
    /// Cancelled waits whose target had been reached before they started
    pub race_violations: u64,
}

impl WaitTally {
    fn merge(&mut self, other: &WaitTally) {
        self.immediate += other.immediate;
        self.satisfied += other.satisfied;
        self.cancelled += other.cancelled;
        self.rejected += other.rejected;
        self.closed += other.closed;
        self.race_violations += other.race_violations;
    }

    /// Total number of resolved waits.
    pub fn total(&self) -> u64 {
        self.immediate + self.satisfied + self.cancelled + self.rejected + self.closed
    }
}

/// Result of a soak run.
#[derive(Debug, Clone, Serialize)]
pub struct SoakSummary {
    pub hub: String,
    pub tasks: usize,
    /// Last progress value the producer advanced to
    pub final_done_upto: u64,
    pub elapsed_ms: u64,
    /// True if shutdown was requested before the tasks finished
    pub interrupted: bool,
    pub waits: WaitTally,
}

impl fmt::Display for SoakSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Soak results for hub '{}':", self.hub)?;
        writeln!(f, "  Tasks:            {}", self.tasks)?;
        writeln!(f, "  Final progress:   {}", self.final_done_upto)?;
        writeln!(f, "  Duration:         {} ms", self.elapsed_ms)?;
        writeln!(f, "  Interrupted:      {}", self.interrupted)?;
        writeln!(f, "  Waits:            {}", self.waits.total())?;
        writeln!(f, "    immediate:      {}", self.waits.immediate)?;
        writeln!(f, "    satisfied:      {}", self.waits.satisfied)?;
        writeln!(f, "    cancelled:      {}", self.waits.cancelled)?;
        writeln!(f, "    rejected:       {}", self.waits.rejected)?;
        writeln!(f, "    closed:         {}", self.waits.closed)?;
        write!(f, "  Race violations:  {}", self.waits.race_violations)
    }
}

/// Run a soak until every task finishes or `shutdown` flips to true.
///
/// The hub is closed exactly once at the end, or early on shutdown, which
/// releases any task still blocked.
pub async fn run(config: SoakConfig, mut shutdown: watch::Receiver<bool>) -> Result<SoakSummary> {
    let hub = Arc::new(config.hub.build().context("invalid hub configuration")?);
    let started = Instant::now();

    tracing::info!(
        hub = %hub.name(),
        tasks = config.tasks,
        waits_per_task = config.waits_per_task,
        max_waiters = hub.capacity(),
        "Starting soak"
    );

    let producer_stop = CancellationToken::new();
    let producer = tokio::spawn(produce(
        hub.clone(),
        config.hub.initial_progress,
        config.advance_interval,
        producer_stop.clone(),
    ));

    let closer = {
        let hub = hub.clone();
        tokio::spawn(async move {
            // Err means the sender went away without requesting shutdown
            if shutdown.changed().await.is_ok() && *shutdown.borrow() {
                tracing::info!("Shutdown requested, closing hub");
                let _ = hub.close();
            }
        })
    };

    let consumers: Vec<_> = (0..config.tasks)
        .map(|task| tokio::spawn(consume(hub.clone(), task as u64, config.clone())))
        .collect();

    let mut waits = WaitTally::default();
    for result in futures::future::join_all(consumers).await {
        let tally = result.context("waiting task failed")?;
        waits.merge(&tally);
    }

    closer.abort();
    producer_stop.cancel();
    let final_done_upto = producer.await.context("producer task failed")?;

    // Already closed here means shutdown beat us to it
    let interrupted = hub.close().is_err();

    let summary = SoakSummary {
        hub: hub.name().to_string(),
        tasks: config.tasks,
        final_done_upto,
        elapsed_ms: started.elapsed().as_millis() as u64,
        interrupted,
        waits,
    };

    if summary.waits.race_violations > 0 {
        tracing::error!(
            violations = summary.waits.race_violations,
            "Cancelled waits observed for already-reached targets"
        );
    }
    tracing::info!(
        final_done_upto = summary.final_done_upto,
        waits = summary.waits.total(),
        elapsed_ms = summary.elapsed_ms,
        "Soak complete"
    );

    Ok(summary)
}

/// Advance progress by one per tick until stopped or the hub closes.
///
/// Returns the last value advanced to.
async fn produce(
    hub: Arc<ProgressHub>,
    initial: u64,
    interval: Duration,
    stop: CancellationToken,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut done_upto = initial;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let next = done_upto.saturating_add(1);
                if hub.advance_to(next).is_err() {
                    tracing::debug!(done_upto, "Hub closed, producer stopping");
                    break;
                }
                done_upto = next;
            }
        }
    }
    done_upto
}

/// Target for one wait: `done_upto + lead - max_lead / 2`, saturating.
///
/// `lead` cycles through `0..=max_lead` by task and round, so targets range
/// from half a lead behind progress to half a lead ahead and a run mixes
/// already-reached, soon-reached and timed-out waits.
fn wait_target(done_upto: u64, task: u64, round: u64, max_lead: u64) -> u64 {
    let lead = task.wrapping_add(round) % max_lead.saturating_add(1);
    done_upto
        .saturating_add(lead)
        .saturating_sub(max_lead / 2)
}

/// Issue `waits_per_task` waits around the current progress.
async fn consume(hub: Arc<ProgressHub>, task: u64, config: SoakConfig) -> WaitTally {
    let mut tally = WaitTally::default();

    for round in 0..config.waits_per_task {
        let Ok(before) = hub.status() else {
            tally.closed += 1;
            break;
        };
        let target = wait_target(before.done_upto, task, round, config.max_lead);

        match hub.wait_for_timeout(target, config.wait_timeout).await {
            Ok(()) if target <= before.done_upto => tally.immediate += 1,
            Ok(()) => tally.satisfied += 1,
            Err(HubError::CancellationRequested) => {
                tally.cancelled += 1;
                if target <= before.done_upto {
                    tally.race_violations += 1;
                    tracing::error!(
                        task,
                        target,
                        done_upto = before.done_upto,
                        "Wait cancelled although its target was already reached"
                    );
                }
            }
            Err(HubError::MaxWaitersExceeded { .. }) => {
                tally.rejected += 1;
                tokio::task::yield_now().await;
            }
            Err(HubError::AlreadyClosed) => {
                tally.closed += 1;
                break;
            }
        }
    }

    tally
}
