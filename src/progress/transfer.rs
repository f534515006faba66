//! Transfer backends that produce progress chunks.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

use crate::retry::FailureType;
use crate::task::DownloadTask;

/// Slowest simulated speed (0.5 MiB/s).
const SIMULATED_MIN_SPEED: u64 = 512 * 1024;

/// Fastest simulated speed (2.5 MiB/s).
const SIMULATED_MAX_SPEED: u64 = 5 * 512 * 1024;

/// Bytes delivered during one progress tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: u64,
    pub speed_bytes_per_sec: u64,
}

/// A failed transfer attempt. Recorded on the task, never returned from a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The connection to the source failed.
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    /// One attempt took longer than the configured bound.
    #[error("transfer timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The source stopped serving the file mid-transfer.
    #[error("transfer interrupted for {url}: {message}")]
    Interrupted { url: String, message: String },
}

impl TransferError {
    /// Classifies this failure for the retry policy.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => FailureType::Transient,
            Self::Interrupted { .. } => FailureType::Permanent,
        }
    }
}

/// Source of progress for downloading tasks.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Produces the chunk transferred during one tick of length `tick`.
    async fn advance(&self, task: &DownloadTask, tick: Duration) -> Result<Chunk, TransferError>;

    /// Discards partially transferred data of a cancelled task.
    async fn discard_partial(&self, _task: &DownloadTask) {}
}

/// Simulated transfer: uniform random speed, optional random failures.
#[derive(Debug, Clone)]
pub struct SimulatedTransfer {
    failure_rate: f64,
}

impl Default for SimulatedTransfer {
    fn default() -> Self {
        Self { failure_rate: 0.0 }
    }
}

impl SimulatedTransfer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-tick failure probability.
    ///
    /// # Errors
    ///
    /// Returns the rejected value if it is outside `0.0..=1.0`.
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Result<Self, f64> {
        if !(0.0..=1.0).contains(&failure_rate) {
            return Err(failure_rate);
        }
        self.failure_rate = failure_rate;
        Ok(self)
    }

    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }
}

#[async_trait]
impl Transfer for SimulatedTransfer {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    async fn advance(&self, task: &DownloadTask, tick: Duration) -> Result<Chunk, TransferError> {
        let (fails, speed) = {
            let mut rng = rand::thread_rng();
            let fails = self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate);
            let speed = rng.gen_range(SIMULATED_MIN_SPEED..=SIMULATED_MAX_SPEED);
            (fails, speed)
        };
        if fails {
            return Err(TransferError::Network {
                url: task.source_url.clone(),
                message: "simulated connection reset".to_string(),
            });
        }
        let bytes = (speed as f64 * tick.as_secs_f64()).round() as u64;
        Ok(Chunk {
            bytes: bytes.max(1),
            speed_bytes_per_sec: speed,
        })
    }
}
