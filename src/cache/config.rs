//! Cache configuration.
//!
//! Controls entry lifetimes for the shared and per-user layers and how misses
//! are coordinated.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_SHARED_TTL_SECS: u64 = 300;
const DEFAULT_USER_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_NOT_FOUND_TTL_SECS: u64 = 60;

/// Cache configuration from the `[cache]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a shared discussion entry.
    pub shared_ttl_secs: u64,
    /// Lifetime of a per-user reaction entry.
    pub user_ttl_secs: u64,
    /// Lifetime of a cached "no discussion yet" result.
    pub not_found_ttl_secs: u64,
    /// Let anonymous misses served by the fallback credential write the shared layer.
    pub populate_from_fallback: bool,
    /// Merge distinct fetches issued in the same scheduling turn.
    pub batching: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shared_ttl_secs: DEFAULT_SHARED_TTL_SECS,
            user_ttl_secs: DEFAULT_USER_TTL_SECS,
            not_found_ttl_secs: DEFAULT_NOT_FOUND_TTL_SECS,
            populate_from_fallback: false,
            batching: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            shared_ttl_secs: settings.shared_ttl.as_secs(),
            user_ttl_secs: settings.user_ttl.as_secs(),
            not_found_ttl_secs: settings.not_found_ttl.as_secs(),
            populate_from_fallback: settings.populate_from_fallback,
            batching: settings.batching,
        }
    }
}

impl CacheConfig {
    pub fn shared_ttl(&self) -> Duration {
        Duration::from_secs(self.shared_ttl_secs.max(1))
    }

    pub fn user_ttl(&self) -> Duration {
        Duration::from_secs(self.user_ttl_secs.max(1))
    }

    /// Never longer than the shared TTL.
    pub fn not_found_ttl(&self) -> Duration {
        Duration::from_secs(self.not_found_ttl_secs.clamp(1, self.shared_ttl_secs.max(1)))
    }
}
