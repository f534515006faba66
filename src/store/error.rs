//! Error types for task store operations.

use thiserror::Error;

/// Errors returned by [`super::TaskStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No task with this id exists.
    #[error(
        "download task not found: {id}\n  Suggestion: The task may have been removed or the ID is incorrect"
    )]
    NotFound {
        /// The missing task id.
        id: String,
    },

    /// A task with this id already exists.
    #[error("download task already exists: {id}")]
    DuplicateId {
        /// The colliding task id.
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_not_found_message() {
        let err = StoreError::NotFound {
            id: "download_1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("download_1"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_store_error_duplicate_message() {
        let err = StoreError::DuplicateId {
            id: "download_1".to_string(),
        };
        assert!(err.to_string().contains("already exists"));
    }
}
