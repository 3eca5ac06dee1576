//! Cross-user discussion cache.

use std::sync::Arc;
use std::time::Duration;

use marginalia_api_types::DiscussionPayload;
use metrics::counter;
use tracing::{debug, warn};

use crate::domain::reactions::sanitize_for_shared;
use crate::domain::thread::ThreadKey;

use super::clock::Clock;
use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::keys::CacheKey;
use super::kv::{KvError, KvStore};

const SOURCE: &str = "cache::shared";
const METRIC_SHARED_HIT: &str = "marginalia_shared_cache_hit_total";
const METRIC_SHARED_MISS: &str = "marginalia_shared_cache_miss_total";

/// Discussion payloads keyed by thread alone.
///
/// Stored payloads never carry a viewer's personal reaction flags.
#[derive(Clone)]
pub struct SharedCache {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl SharedCache {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self { kv, clock, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Look up a live entry. Service errors and undecodable entries count as misses.
    pub async fn get(&self, thread: &ThreadKey) -> Option<CacheEntry<DiscussionPayload>> {
        match self.load(thread).await {
            Some(entry) => {
                counter!(METRIC_SHARED_HIT).increment(1);
                debug!(cache = "shared", outcome = "hit", thread = %thread);
                Some(entry)
            }
            None => {
                counter!(METRIC_SHARED_MISS).increment(1);
                debug!(cache = "shared", outcome = "miss", thread = %thread);
                None
            }
        }
    }

    /// Store a payload with a fresh lifetime, clearing viewer flags first.
    pub async fn put(
        &self,
        thread: &ThreadKey,
        mut payload: DiscussionPayload,
        ttl: Duration,
    ) -> Result<CacheEntry<DiscussionPayload>, KvError> {
        sanitize_for_shared(&mut payload);
        let entry = CacheEntry::new(payload, self.clock.now(), ttl);
        self.store_entry(thread, &entry, ttl).await?;
        debug!(
            cache = "shared",
            outcome = "stored",
            thread = %thread,
            ttl_secs = ttl.as_secs(),
            found = entry.payload.is_found()
        );
        Ok(entry)
    }

    pub async fn purge(&self, thread: &ThreadKey) -> Result<bool, KvError> {
        let key = CacheKey::shared(thread);
        let purged = self.kv.delete(&key.storage_key()).await?;
        debug!(cache = "shared", outcome = "purged", thread = %thread, purged);
        Ok(purged)
    }

    /// Remaining lifetime of an entry as seen by this cache's clock.
    pub fn remaining_ttl(&self, entry: &CacheEntry<DiscussionPayload>) -> Option<Duration> {
        entry.remaining_ttl(self.clock.now())
    }

    /// Read a live entry without touching hit/miss accounting.
    pub(crate) async fn load(&self, thread: &ThreadKey) -> Option<CacheEntry<DiscussionPayload>> {
        let key = CacheKey::shared(thread);
        let raw = match self.kv.get(&key.storage_key()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    source = SOURCE,
                    thread = %thread,
                    error = %err,
                    "Shared cache read failed; treating as miss"
                );
                return None;
            }
        };

        let entry = match CacheEntry::<DiscussionPayload>::decode(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    source = SOURCE,
                    thread = %thread,
                    error = %err,
                    "Undecodable shared cache entry; treating as miss"
                );
                return None;
            }
        };

        entry.is_fresh(self.clock.now()).then_some(entry)
    }

    /// Write an entry as-is, keeping its original `cached_at`.
    pub(crate) async fn store_entry(
        &self,
        thread: &ThreadKey,
        entry: &CacheEntry<DiscussionPayload>,
        lifetime: Duration,
    ) -> Result<(), KvError> {
        let key = CacheKey::shared(thread);
        let encoded = entry
            .encode()
            .map_err(|err| KvError::transport(format!("failed to encode entry: {err}")))?;
        self.kv.put(&key.storage_key(), encoded, lifetime).await
    }
}
