//! Collaborator seams: the content catalog, the user directory and the
//! download volume.
//!
//! The scheduler never owns content or account data. It asks a
//! [`ContentCatalog`] which variants exist and a [`UserDirectory`] whether the
//! caller may download and at what tier. A [`StorageProbe`] reports the free
//! space left for new downloads. Static in-memory implementations are
//! provided for the demo binary and tests.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// One downloadable quality/format of a content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentVariant {
    pub quality: String,
    pub format: String,
    pub size_bytes: u64,
    pub source_url: String,
}

impl ContentVariant {
    #[must_use]
    pub fn new(
        quality: impl Into<String>,
        format: impl Into<String>,
        size_bytes: u64,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            quality: quality.into(),
            format: format.into(),
            size_bytes,
            source_url: source_url.into(),
        }
    }
}

/// Catalog metadata for a movie or photo.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentInfo {
    pub title: String,
    pub variants: Vec<ContentVariant>,
}

impl ContentInfo {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            variants: Vec::new(),
        }
    }

    /// Adds a downloadable variant.
    #[must_use]
    pub fn with_variant(mut self, variant: ContentVariant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Finds a variant by quality and format, ignoring ASCII case.
    #[must_use]
    pub fn variant(&self, quality: &str, format: &str) -> Option<&ContentVariant> {
        self.variants.iter().find(|variant| {
            variant.quality.eq_ignore_ascii_case(quality)
                && variant.format.eq_ignore_ascii_case(format)
        })
    }
}

/// Read-only view of the content catalog.
#[async_trait]
pub trait ContentCatalog: Send + Sync {
    /// Returns the content item, or `None` if the id is unknown.
    async fn lookup(&self, content_id: &str) -> Option<ContentInfo>;
}

/// Whether an account may use the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disabled,
}

/// Subscription tier. Only the free tier is subject to the daily quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Premium,
    Vip,
}

impl SubscriptionTier {
    /// Returns true for tiers that are subject to the daily quota.
    #[must_use]
    pub fn is_unprivileged(self) -> bool {
        self == Self::Free
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Vip => "vip",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            "vip" => Ok(Self::Vip),
            _ => Err(format!("invalid subscription tier: {s}")),
        }
    }
}

/// What the scheduler needs to know about a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub status: AccountStatus,
    pub tier: SubscriptionTier,
}

impl UserProfile {
    /// An active account on the given tier.
    #[must_use]
    pub fn active(tier: SubscriptionTier) -> Self {
        Self {
            status: AccountStatus::Active,
            tier,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Read-only view of user accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns the user's profile, or `None` if the user is unknown.
    async fn lookup(&self, user_id: &str) -> Option<UserProfile>;
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    items: DashMap<String, ContentInfo>,
}

impl StaticCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a content item, builder style.
    #[must_use]
    pub fn with_content(self, content_id: impl Into<String>, info: ContentInfo) -> Self {
        self.insert(content_id, info);
        self
    }

    /// Adds or replaces a content item.
    pub fn insert(&self, content_id: impl Into<String>, info: ContentInfo) {
        self.items.insert(content_id.into(), info);
    }
}

#[async_trait]
impl ContentCatalog for StaticCatalog {
    async fn lookup(&self, content_id: &str) -> Option<ContentInfo> {
        self.items.get(content_id).map(|entry| entry.value().clone())
    }
}

/// In-memory user directory.
///
/// Users not listed explicitly fall back to the default profile, if one is set.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    users: HashMap<String, UserProfile>,
    fallback: Option<UserProfile>,
}

impl StaticUserDirectory {
    /// A directory that knows nobody.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory that treats every user as active on `tier`.
    #[must_use]
    pub fn allow_all(tier: SubscriptionTier) -> Self {
        Self {
            users: HashMap::new(),
            fallback: Some(UserProfile::active(tier)),
        }
    }

    /// Registers a user profile, builder style.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>, profile: UserProfile) -> Self {
        self.users.insert(user_id.into(), profile);
        self
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn lookup(&self, user_id: &str) -> Option<UserProfile> {
        self.users.get(user_id).copied().or(self.fallback)
    }
}

/// Free space reported by [`FixedStorage::default`] (50 GiB).
pub const DEFAULT_AVAILABLE_SPACE: u64 = 50 * 1024 * 1024 * 1024;

/// Free space on the volume downloads are written to.
#[async_trait]
pub trait StorageProbe: Send + Sync {
    /// Bytes currently available for new downloads.
    async fn available_bytes(&self) -> u64;
}

/// A volume that always reports the same free space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedStorage {
    available: u64,
}

impl FixedStorage {
    #[must_use]
    pub const fn new(available_bytes: u64) -> Self {
        Self {
            available: available_bytes,
        }
    }
}

impl Default for FixedStorage {
    fn default() -> Self {
        Self::new(DEFAULT_AVAILABLE_SPACE)
    }
}

#[async_trait]
impl StorageProbe for FixedStorage {
    async fn available_bytes(&self) -> u64 {
        self.available
    }
}
