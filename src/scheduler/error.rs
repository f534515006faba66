//! Error types for scheduler commands.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::DenyReason;
use crate::store::StoreError;
use crate::task::{TaskStatus, TransitionError};

/// Errors returned by [`super::Scheduler`] commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Admission control refused to start the download.
    #[error("admission denied: {reason}")]
    AdmissionDenied { reason: DenyReason },

    #[error(
        "download task not found: {id}\n  Suggestion: The task may have been removed or the ID is incorrect"
    )]
    NotFound { id: String },

    /// The task belongs to another user.
    #[error("download task {id} belongs to another user")]
    Forbidden { id: String },

    #[error("cannot change download task {id} ({from}): {reason}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        reason: &'static str,
    },

    #[error("content not found: {content_id}")]
    ContentNotFound { content_id: String },

    #[error(
        "content {content_id} has no {quality}/{format} variant\n  Suggestion: Pick one of the qualities and formats listed for this title"
    )]
    VariantUnavailable {
        content_id: String,
        quality: String,
        format: String,
    },

    #[error("unknown user: {user_id}")]
    UnknownUser { user_id: String },

    #[error("account disabled: {user_id}")]
    AccountDisabled { user_id: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Generated task id collided with an existing one.
    #[error("download task id already in use: {id}")]
    DuplicateTaskId { id: String },
}

impl SchedulerError {
    pub(crate) fn transition(id: &str, error: TransitionError) -> Self {
        Self::InvalidTransition {
            id: id.to_string(),
            from: error.from,
            reason: error.reason,
        }
    }

    /// Stable label for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AdmissionDenied { .. } => ErrorKind::AdmissionDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::ContentNotFound { .. } => ErrorKind::ContentNotFound,
            Self::VariantUnavailable { .. } => ErrorKind::VariantUnavailable,
            Self::UnknownUser { .. } => ErrorKind::UnknownUser,
            Self::AccountDisabled { .. } => ErrorKind::AccountDisabled,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::DuplicateTaskId { .. } => ErrorKind::DuplicateTaskId,
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => Self::NotFound { id },
            StoreError::DuplicateId { id } => Self::DuplicateTaskId { id },
        }
    }
}

/// Machine-readable error category, used in batch results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    AdmissionDenied,
    NotFound,
    Forbidden,
    InvalidTransition,
    ContentNotFound,
    VariantUnavailable,
    UnknownUser,
    AccountDisabled,
    InvalidRequest,
    DuplicateTaskId,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdmissionDenied => "AdmissionDenied",
            Self::NotFound => "NotFound",
            Self::Forbidden => "Forbidden",
            Self::InvalidTransition => "InvalidTransition",
            Self::ContentNotFound => "ContentNotFound",
            Self::VariantUnavailable => "VariantUnavailable",
            Self::UnknownUser => "UnknownUser",
            Self::AccountDisabled => "AccountDisabled",
            Self::InvalidRequest => "InvalidRequest",
            Self::DuplicateTaskId => "DuplicateTaskId",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
