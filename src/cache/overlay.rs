//! Per-viewer reaction overlay.
//!
//! The shared layer only knows aggregate counts. Whether the current viewer
//! reacted is resolved separately, cached under a key derived from the
//! viewer's credential, and written onto a copy of the shared payload.

use std::sync::Arc;

use marginalia_api_types::DiscussionPayload;
use metrics::counter;
use tracing::{debug, warn};

use crate::application::remote::DiscussionApi;
use crate::domain::credential::Credential;
use crate::domain::reactions::{ViewerReactions, extract_reactions, overlay};
use crate::domain::thread::ThreadKey;

use super::clock::Clock;
use super::config::CacheConfig;
use super::entry::{CacheEntry, UserReactionsEntry};
use super::keys::CacheKey;
use super::kv::{KvError, KvStore};

const SOURCE: &str = "cache::overlay";
const METRIC_USER_HIT: &str = "marginalia_user_cache_hit_total";
const METRIC_USER_MISS: &str = "marginalia_user_cache_miss_total";

/// How a viewer's reaction state was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPath {
    /// Per-user cache hit.
    Cached,
    /// Extracted from a payload fetched with the viewer's own credential.
    FromFetch,
    /// Dedicated remote lookup.
    Remote,
    /// The thread has no comments or replies; nothing was looked up.
    NoSubjects,
    /// The remote lookup failed; an empty state was returned and not cached.
    Unavailable,
}

pub struct UserReactionOverlay {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    api: Arc<dyn DiscussionApi>,
    config: CacheConfig,
}

impl UserReactionOverlay {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        api: Arc<dyn DiscussionApi>,
        config: CacheConfig,
    ) -> Self {
        Self {
            kv,
            clock,
            api,
            config,
        }
    }

    /// Resolve the viewer's reactions for a thread.
    ///
    /// `fetched` is the raw payload when the current result was fetched with
    /// this viewer's credential.
    pub async fn resolve(
        &self,
        thread: &ThreadKey,
        credential: &Credential,
        subject_ids: &[String],
        fetched: Option<&DiscussionPayload>,
    ) -> (ViewerReactions, ResolutionPath) {
        let key = CacheKey::user(thread, credential.fingerprint());

        if let Some(reactions) = self.load(&key).await {
            counter!(METRIC_USER_HIT).increment(1);
            debug!(cache = "user", outcome = "hit", thread = %thread);
            return (reactions, ResolutionPath::Cached);
        }
        counter!(METRIC_USER_MISS).increment(1);
        debug!(cache = "user", outcome = "miss", thread = %thread);

        if let Some(payload) = fetched {
            let reactions = extract_reactions(payload);
            self.store(&key, &reactions).await;
            return (reactions, ResolutionPath::FromFetch);
        }

        if subject_ids.is_empty() {
            return (ViewerReactions::new(), ResolutionPath::NoSubjects);
        }

        match self
            .api
            .fetch_viewer_reactions(credential, subject_ids)
            .await
        {
            Some(reactions) => {
                self.store(&key, &reactions).await;
                (reactions, ResolutionPath::Remote)
            }
            None => {
                debug!(
                    cache = "user",
                    outcome = "unavailable",
                    thread = %thread,
                    subjects = subject_ids.len()
                );
                (ViewerReactions::new(), ResolutionPath::Unavailable)
            }
        }
    }

    /// Resolve and write the viewer's flags onto `payload`.
    pub async fn personalize(
        &self,
        thread: &ThreadKey,
        credential: &Credential,
        payload: &mut DiscussionPayload,
        fetched: Option<&DiscussionPayload>,
    ) -> ResolutionPath {
        let subject_ids = payload.subject_ids();
        let (reactions, path) = self
            .resolve(thread, credential, &subject_ids, fetched)
            .await;
        overlay(payload, &reactions);
        path
    }

    /// Drop the viewer's cached state for a thread.
    pub async fn invalidate(
        &self,
        thread: &ThreadKey,
        credential: &Credential,
    ) -> Result<bool, KvError> {
        let key = CacheKey::user(thread, credential.fingerprint());
        let purged = self.kv.delete(&key.storage_key()).await?;
        debug!(cache = "user", outcome = "purged", thread = %thread, purged);
        Ok(purged)
    }

    async fn load(&self, key: &CacheKey) -> Option<ViewerReactions> {
        let raw = match self.kv.get(&key.storage_key()).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(
                    source = SOURCE,
                    thread = %key.thread(),
                    error = %err,
                    "User cache read failed; treating as miss"
                );
                return None;
            }
        };

        match CacheEntry::<UserReactionsEntry>::decode(&raw) {
            Ok(entry) if entry.is_fresh(self.clock.now()) => Some(entry.payload.reactions),
            Ok(_) => None,
            Err(err) => {
                warn!(
                    source = SOURCE,
                    thread = %key.thread(),
                    error = %err,
                    "Undecodable user cache entry; treating as miss"
                );
                None
            }
        }
    }

    async fn store(&self, key: &CacheKey, reactions: &ViewerReactions) {
        let ttl = self.config.user_ttl();
        let entry = CacheEntry::new(
            UserReactionsEntry {
                reactions: reactions.clone(),
            },
            self.clock.now(),
            ttl,
        );

        let result = match entry.encode() {
            Ok(encoded) => self.kv.put(&key.storage_key(), encoded, ttl).await,
            Err(err) => Err(KvError::transport(format!("failed to encode entry: {err}"))),
        };

        if let Err(err) = result {
            warn!(
                source = SOURCE,
                thread = %key.thread(),
                error = %err,
                "Failed to store user reaction state"
            );
        }
    }
}
