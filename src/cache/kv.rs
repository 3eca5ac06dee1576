//! Key-value cache service abstraction.
//!
//! Shared and per-user entries must be visible to every proxy instance, so
//! they live behind [`KvStore`] rather than in process memory. [`MemoryKv`]
//! backs single-instance deployments and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use super::clock::Clock;

/// Writes between opportunistic sweeps of expired [`MemoryKv`] entries.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("cache service request failed: {0}")]
    Transport(String),
    #[error("cache service responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid cache key `{0}`")]
    InvalidKey(String),
}

impl KvError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError>;

    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), KvError>;

    /// Remove a key, reporting whether a live value was present.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;
}

struct StoredValue {
    value: Bytes,
    expires_at: OffsetDateTime,
}

/// In-process [`KvStore`] with per-key expiry.
///
/// Expired keys are dropped when read and by a sweep every [`SWEEP_EVERY`] writes.
pub struct MemoryKv {
    clock: Arc<dyn Clock>,
    entries: DashMap<String, StoredValue>,
    writes: AtomicU64,
}

impl MemoryKv {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        let now = self.clock.now();
        let live = self
            .entries
            .get(key)
            .map(|stored| (stored.expires_at > now).then(|| stored.value.clone()));

        match live {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, stored| stored.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), KvError> {
        let expires_at = self.clock.now() + ttl;
        self.entries
            .insert(key.to_string(), StoredValue { value, expires_at });

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            let evicted = self.evict_expired();
            if evicted > 0 {
                debug!(evicted, "Swept expired cache entries");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, stored)| stored.expires_at > now))
    }
}
