//! In-process task store.
//!
//! Holds every [`DownloadTask`] keyed by id. Readers always receive cloned
//! snapshots; writes replace the whole record so a reader never observes a
//! half-applied transition. Only the scheduler writes.

mod error;

use std::cmp::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

pub use error::StoreError;

use crate::task::{DownloadTask, TaskStatus};

/// Concurrent map of download tasks keyed by task id.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<String, DownloadTask>,
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if the id is already present.
    pub fn insert(&self, task: DownloadTask) -> Result<(), StoreError> {
        match self.tasks.entry(task.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId { id: task.id }),
            Entry::Vacant(slot) => {
                slot.insert(task);
                Ok(())
            }
        }
    }

    /// Replaces an existing task record. Never creates one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is absent.
    pub fn put(&self, task: DownloadTask) -> Result<(), StoreError> {
        match self.tasks.get_mut(&task.id) {
            Some(mut existing) => {
                *existing = task;
                Ok(())
            }
            None => Err(StoreError::NotFound { id: task.id }),
        }
    }

    /// Returns a snapshot of the task, if present.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<DownloadTask> {
        self.tasks.get(id).map(|entry| entry.value().clone())
    }

    /// Returns true if a task with this id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Returns the user's tasks in scheduling order.
    #[must_use]
    pub fn list_by_user(&self, user_id: &str) -> Vec<DownloadTask> {
        self.collect_sorted(|task| task.user_id == user_id)
    }

    /// Returns tasks with the given status in scheduling order.
    #[must_use]
    pub fn list_by_status(&self, status: TaskStatus) -> Vec<DownloadTask> {
        self.collect_sorted(|task| task.status == status)
    }

    /// Returns every task in scheduling order.
    #[must_use]
    pub fn list_all(&self) -> Vec<DownloadTask> {
        self.collect_sorted(|_| true)
    }

    /// Removes a task, returning its last snapshot.
    pub fn remove(&self, id: &str) -> Option<DownloadTask> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    /// Number of stored tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the store holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn collect_sorted(&self, keep: impl Fn(&DownloadTask) -> bool) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = self
            .tasks
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by(scheduling_order);
        tasks
    }
}

/// Higher priority first, then oldest first, then id for a stable order.
pub(crate) fn scheduling_order(a: &DownloadTask, b: &DownloadTask) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
