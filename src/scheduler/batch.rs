//! Batch commands with per-item failure reporting.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{ErrorKind, Scheduler};

/// Command applied to every id of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    Pause,
    Resume,
    Cancel,
    Retry,
    Remove,
}

impl BatchOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Retry => "retry",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "cancel" => Ok(Self::Cancel),
            "retry" => Ok(Self::Retry),
            "remove" => Ok(Self::Remove),
            _ => Err(format!("invalid batch operation: {s}")),
        }
    }
}

/// One id that the batch could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub id: String,
    pub kind: ErrorKind,
    pub error: String,
}

/// Outcome of [`Scheduler::batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Ids processed successfully, in input order.
    pub successful: Vec<String>,
    /// Ids that failed, in input order.
    pub failed: Vec<BatchFailure>,
    pub message: String,
}

impl Scheduler {
    /// Applies `operation` to each id independently.
    ///
    /// One failing id never stops the rest; failures are collected in the
    /// result.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn batch<S: AsRef<str>>(
        &self,
        user_id: &str,
        ids: &[S],
        operation: BatchOperation,
    ) -> BatchResult {
        let mut result = BatchResult::default();
        for id in ids {
            let id = id.as_ref();
            let outcome = match operation {
                BatchOperation::Pause => self.pause(id, user_id).await,
                BatchOperation::Resume => self.resume(id, user_id).await,
                BatchOperation::Cancel => self.cancel(id, user_id, None).await,
                BatchOperation::Retry => self.retry(id, user_id).await,
                BatchOperation::Remove => self.remove(id, user_id).await,
            };
            match outcome {
                Ok(_) => result.successful.push(id.to_string()),
                Err(error) => result.failed.push(BatchFailure {
                    id: id.to_string(),
                    kind: error.kind(),
                    error: error.to_string(),
                }),
            }
        }
        result.message = format!(
            "batch {operation} finished: {} succeeded, {} failed",
            result.successful.len(),
            result.failed.len()
        );
        info!(
            succeeded = result.successful.len(),
            failed = result.failed.len(),
            "batch finished"
        );
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_operation_round_trip() {
        for op in [
            BatchOperation::Pause,
            BatchOperation::Resume,
            BatchOperation::Cancel,
            BatchOperation::Retry,
            BatchOperation::Remove,
        ] {
            assert_eq!(op.as_str().parse::<BatchOperation>().unwrap(), op);
        }
        assert!("explode".parse::<BatchOperation>().is_err());
    }
}
