//! Store configuration.

use std::time::Duration;

/// Configuration shared by every local store opened from a database.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to sync the journal to disk on every commit.
    pub sync_on_commit: bool,
    /// Rewrite the journal as a single snapshot once it holds this many frames.
    pub compact_after_frames: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            compact_after_frames: Some(1024),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic compaction threshold (`None` disables it).
    #[must_use]
    pub const fn compact_after_frames(mut self, frames: Option<usize>) -> Self {
        self.compact_after_frames = frames;
        self
    }
}

/// Configuration for [`crate::TenantCache`].
#[derive(Debug, Clone)]
pub struct TenantCacheConfig {
    /// How long a resolved tenant id is served from cache.
    pub ttl: Duration,
}

impl Default for TenantCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl TenantCacheConfig {
    /// Sets the time-to-live.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}
