//! Task lifecycle notifications.
//!
//! The scheduler publishes a [`TaskEvent`] after every state change and on
//! every progress tick. Subscribers get a `tokio::sync::broadcast` receiver;
//! slow subscribers lag and lose old events rather than blocking the
//! scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::task::DownloadTask;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Created and admitted straight into `Downloading`.
    Created,
    /// Created as `Pending`, waiting for a slot.
    Queued,
    /// A pending task got a slot.
    Started,
    Progress,
    Paused,
    Resumed,
    Completed,
    Failed,
    Cancelled,
    Retried,
    Removed,
}

impl TaskEventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retried => "retried",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification, carrying the task snapshot after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub kind: TaskEventKind,
    pub task: DownloadTask,
}

/// Broadcast channel wrapper.
#[derive(Debug)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Sends an event; having no subscribers is not an error.
    pub(crate) fn publish(&self, kind: TaskEventKind, task: &DownloadTask) {
        let event = TaskEvent {
            task_id: task.id.clone(),
            kind,
            task: task.clone(),
        };
        if self.sender.send(event).is_err() {
            trace!(task_id = %task.id, %kind, "no event subscribers");
        }
    }
}
