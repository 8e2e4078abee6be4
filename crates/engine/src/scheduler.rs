//! Retry scheduler.
//!
//! Periodically claims transactions that are due (their retry time has
//! passed and no live lease covers them) and runs one pass over each. This
//! is also how transactions orphaned by a crashed worker are resumed.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use txweave_core::GlobalStatus;

use crate::config::SchedulerConfig;
use crate::engine::{Engine, PassOutcome};
use crate::error::EngineError;

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub claimed: u64,
    pub finished: u64,
    pub failed: u64,
    pub retried: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl SchedulerHandle {
    /// Request graceful shutdown and wait for the in-flight tick to end.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Drives due transactions to completion.
#[derive(Debug, Clone)]
pub struct Scheduler {
    engine: Engine,
    config: SchedulerConfig,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl Scheduler {
    pub fn new(engine: Engine, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Claim one batch of due transactions and run a pass over each.
    ///
    /// Returns how many transactions were claimed.
    pub async fn tick(&self) -> Result<usize, EngineError> {
        let engine = &self.engine;
        let claimed = engine
            .store()
            .claim_due_for_retry(
                &engine.lease_token(),
                Utc::now(),
                self.config.batch_size,
                engine.config().lease,
            )
            .await?;
        let count = claimed.len();
        self.record(|s| {
            s.ticks += 1;
            s.claimed += count as u64;
        });
        if count > 0 {
            debug!(scheduler = %self.config.name, claimed = count, "claimed due transactions");
        }

        futures::stream::iter(claimed)
            .for_each_concurrent(self.config.max_concurrent, |trans| async move {
                let gid = trans.gid.clone();
                match self.engine.run_pass(trans).await {
                    Ok(PassOutcome::Terminal(GlobalStatus::Finished)) => {
                        self.record(|s| s.finished += 1)
                    }
                    Ok(PassOutcome::Terminal(_)) => self.record(|s| s.failed += 1),
                    Ok(PassOutcome::Pending(_)) => self.record(|s| s.retried += 1),
                    Err(err) => {
                        warn!(scheduler = %self.config.name, gid = %gid, error = %err, "pass failed");
                        self.record(|s| s.errors += 1);
                    }
                }
            })
            .await;
        Ok(count)
    }

    /// Run the scheduler loop on the current tokio runtime.
    pub fn spawn(engine: Engine, config: SchedulerConfig) -> SchedulerHandle {
        let scheduler = Self::new(engine, config);
        let stats = scheduler.stats.clone();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(scheduler.run(shutdown_rx));
        SchedulerHandle {
            shutdown,
            join: Some(join),
            stats,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(scheduler = %self.config.name, owner = %self.engine.owner(), "scheduler started");
        let started = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.record(|s| s.uptime_secs = started.elapsed().as_secs());

            // A full batch means more work is probably waiting.
            let busy = match self.tick().await {
                Ok(claimed) => claimed >= self.config.batch_size,
                Err(err) => {
                    warn!(scheduler = %self.config.name, error = %err, "failed to claim transactions");
                    self.record(|s| s.errors += 1);
                    false
                }
            };
            if busy {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(scheduler = %self.config.name, "scheduler stopped");
    }

    fn record(&self, update: impl FnOnce(&mut SchedulerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}
