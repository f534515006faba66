//! Download creation requests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Requested scheduling priority.
///
/// Mapped to the numeric task priority (0-10, higher is scheduled sooner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background downloads.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Jump ahead of normal downloads in the pending queue.
    High,
}

impl Priority {
    /// Returns the numeric task priority for this level.
    #[must_use]
    pub fn value(self) -> u8 {
        match self {
            Self::Low => 3,
            Self::Normal => 5,
            Self::High => 8,
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            _ => Err(format!("invalid priority: {s}")),
        }
    }
}

/// Input for [`crate::Scheduler::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDownloadRequest {
    /// Owning user.
    pub user_id: String,
    /// Movie or photo id in the catalog.
    pub content_id: String,
    /// Requested quality label (e.g. `HD`, `4K`).
    pub quality: String,
    /// Requested container format (e.g. `mkv`).
    pub format: String,
    /// Optional priority; `Normal` when absent.
    pub priority: Option<Priority>,
}

impl CreateDownloadRequest {
    /// Creates a request with default priority.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        content_id: impl Into<String>,
        quality: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            content_id: content_id.into(),
            quality: quality.into(),
            format: format.into(),
            priority: None,
        }
    }

    /// Sets the requested priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Returns the name of the first blank required field, if any.
    #[must_use]
    pub fn first_blank_field(&self) -> Option<&'static str> {
        [
            ("user_id", &self.user_id),
            ("content_id", &self.content_id),
            ("quality", &self.quality),
            ("format", &self.format),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_values_are_ordered() {
        assert!(Priority::Low.value() < Priority::Normal.value());
        assert!(Priority::Normal.value() < Priority::High.value());
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_request_first_blank_field() {
        let request = CreateDownloadRequest::new("u1", "42", "HD", "mkv");
        assert_eq!(request.first_blank_field(), None);

        let request = CreateDownloadRequest::new("u1", "42", " ", "mkv");
        assert_eq!(request.first_blank_field(), Some("quality"));

        let request = CreateDownloadRequest::new("", "", "HD", "mkv");
        assert_eq!(request.first_blank_field(), Some("user_id"));
    }

    #[test]
    fn test_request_with_priority() {
        let request = CreateDownloadRequest::new("u1", "42", "HD", "mkv").with_priority(Priority::Low);
        assert_eq!(request.priority, Some(Priority::Low));
    }
}
