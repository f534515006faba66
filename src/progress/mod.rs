//! Progress workers for downloading tasks.
//!
//! The [`ProgressReporter`] owns at most one tokio worker per task id. Each
//! worker ticks on a fixed interval, asks the [`Transfer`] backend for the
//! next chunk, and hands the outcome to a [`ProgressSink`] (the scheduler),
//! which re-checks the task under its command lock before mutating it.
//!
//! Every worker carries a generation number. A sink rejects ticks whose
//! generation is no longer current, so a worker that raced with `stop` can
//! never move a paused or cancelled task.

mod transfer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

pub use transfer::{Chunk, SimulatedTransfer, Transfer, TransferError};

use crate::task::DownloadTask;

/// Default time between progress ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on a single transfer attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// What one tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Advanced(Chunk),
    Failed(TransferError),
}

/// Whether the worker should keep ticking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Receiver of progress ticks.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Returns the task to advance, or `None` if this worker should exit.
    async fn snapshot(&self, task_id: &str, generation: u64) -> Option<DownloadTask>;

    /// Applies one tick outcome to the task.
    async fn apply(&self, task_id: &str, generation: u64, outcome: TickOutcome) -> TickControl;
}

#[derive(Debug)]
struct Worker {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Registry of running progress workers.
pub struct ProgressReporter {
    workers: DashMap<String, Worker>,
    next_generation: AtomicU64,
    tick_interval: Duration,
    attempt_timeout: Duration,
    transfer: Arc<dyn Transfer>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("workers", &self.workers.len())
            .field("tick_interval", &self.tick_interval)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    #[must_use]
    pub fn new(
        transfer: Arc<dyn Transfer>,
        tick_interval: Duration,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            workers: DashMap::new(),
            next_generation: AtomicU64::new(0),
            tick_interval,
            attempt_timeout,
            transfer,
        }
    }

    /// Starts a worker for the task and returns its generation.
    ///
    /// Returns `None` without spawning if a live worker already exists.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, task_id: &str, sink: Weak<dyn ProgressSink>) -> Option<u64> {
        match self.workers.entry(task_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().handle.is_finished() {
                    debug!(task_id, "progress worker already running");
                    return None;
                }
                let worker = self.spawn_worker(task_id, sink);
                let generation = worker.generation;
                occupied.insert(worker);
                Some(generation)
            }
            Entry::Vacant(vacant) => {
                let worker = self.spawn_worker(task_id, sink);
                let generation = worker.generation;
                vacant.insert(worker);
                Some(generation)
            }
        }
    }

    /// Aborts the task's worker. Returns false if none was running.
    pub fn stop(&self, task_id: &str) -> bool {
        match self.workers.remove(task_id) {
            Some((_, worker)) => {
                worker.handle.abort();
                debug!(task_id, generation = worker.generation, "progress worker stopped");
                true
            }
            None => false,
        }
    }

    /// Detaches a worker that is ending on its own.
    ///
    /// Called from the worker's own tick path, so it must not abort.
    pub fn finish(&self, task_id: &str, generation: u64) {
        self.workers
            .remove_if(task_id, |_, worker| worker.generation == generation);
    }

    /// Returns true if `generation` is the task's live worker.
    #[must_use]
    pub fn is_current(&self, task_id: &str, generation: u64) -> bool {
        self.workers
            .get(task_id)
            .is_some_and(|worker| worker.generation == generation)
    }

    #[must_use]
    pub fn is_running(&self, task_id: &str) -> bool {
        self.workers
            .get(task_id)
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Number of registered workers.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    /// Aborts every worker.
    pub fn stop_all(&self) {
        let ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop(&id);
        }
    }

    /// The backend workers draw chunks from.
    #[must_use]
    pub fn transfer(&self) -> &Arc<dyn Transfer> {
        &self.transfer
    }

    fn spawn_worker(&self, task_id: &str, sink: Weak<dyn ProgressSink>) -> Worker {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = tokio::spawn(run_worker(
            task_id.to_string(),
            generation,
            sink,
            Arc::clone(&self.transfer),
            self.tick_interval,
            self.attempt_timeout,
        ));
        debug!(task_id, generation, "progress worker started");
        Worker { generation, handle }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn run_worker(
    task_id: String,
    generation: u64,
    sink: Weak<dyn ProgressSink>,
    transfer: Arc<dyn Transfer>,
    tick: Duration,
    attempt_timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(sink) = sink.upgrade() else {
            break;
        };
        let Some(task) = sink.snapshot(&task_id, generation).await else {
            break;
        };

        let outcome = match tokio::time::timeout(attempt_timeout, transfer.advance(&task, tick)).await
        {
            Ok(Ok(chunk)) => TickOutcome::Advanced(chunk),
            Ok(Err(error)) => TickOutcome::Failed(error),
            Err(_) => TickOutcome::Failed(TransferError::Timeout {
                elapsed: attempt_timeout,
            }),
        };
        trace!(task_id = %task_id, generation, ?outcome, "progress tick");

        if sink.apply(&task_id, generation, outcome).await == TickControl::Stop {
            break;
        }
    }
}
