//! Read-path coordination.
//!
//! A thread read checks the shared cache, then resolves a miss through one
//! in-flight operation per thread, using the batcher for the upstream fetch.
//! The shared result is then personalized per caller.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use marginalia_api_types::DiscussionPayload;
use tracing::{debug, warn};

use crate::cache::{CacheConfig, ResolutionPath, SharedCache, UserReactionOverlay};
use crate::domain::credential::{Credential, Fingerprint};
use crate::domain::reactions::sanitize_for_shared;
use crate::domain::thread::ThreadKey;

use super::batch::FetchBatcher;
use super::inflight::InFlight;
use super::remote::{FetchRequest, Lookup};

const SOURCE: &str = "application::coordinator";

/// Cache outcome reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Served without touching the shared layer, or not served at all.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// A thread as one caller should see it.
#[derive(Debug, Clone)]
pub struct ThreadView {
    /// `None` when the upstream could not be reached; try again later.
    pub payload: Option<DiscussionPayload>,
    pub cache: CacheStatus,
    /// Remaining shared lifetime, when the payload is backed by the shared layer.
    pub max_age: Option<Duration>,
    pub personalized: bool,
    pub reactions: Option<ResolutionPath>,
}

/// Outcome of one shared resolution, handed to every joined caller.
#[derive(Debug, Clone)]
struct Resolution {
    payload: Option<DiscussionPayload>,
    cache: CacheStatus,
    max_age: Option<Duration>,
    /// Credential whose viewer flags the raw payload carries.
    fetched_by: Option<Fingerprint>,
}

impl Resolution {
    fn unavailable() -> Self {
        Self {
            payload: None,
            cache: CacheStatus::Bypass,
            max_age: None,
            fetched_by: None,
        }
    }
}

pub struct RequestCoordinator {
    shared: SharedCache,
    overlay: Arc<UserReactionOverlay>,
    batcher: Arc<FetchBatcher>,
    inflight: InFlight<ThreadKey, Resolution>,
    fallback: Option<Credential>,
    config: CacheConfig,
}

impl RequestCoordinator {
    pub fn new(
        shared: SharedCache,
        overlay: Arc<UserReactionOverlay>,
        batcher: Arc<FetchBatcher>,
        fallback: Option<Credential>,
    ) -> Self {
        let config = shared.config().clone();
        Self {
            shared,
            overlay,
            batcher,
            inflight: InFlight::new(),
            fallback,
            config,
        }
    }

    /// Resolve a thread for `viewer` (or anonymously).
    ///
    /// `known_id` skips the title search when set; it does not change which
    /// cache entry is used.
    pub async fn fetch(
        &self,
        thread: &ThreadKey,
        known_id: Option<&str>,
        viewer: Option<&Credential>,
    ) -> ThreadView {
        let resolution = match self.shared.get(thread).await {
            Some(entry) => Resolution {
                max_age: self.shared.remaining_ttl(&entry),
                payload: Some(entry.payload),
                cache: CacheStatus::Hit,
                fetched_by: None,
            },
            None => {
                let shared = self.shared.clone();
                let batcher = Arc::clone(&self.batcher);
                let config = self.config.clone();
                let source = self.pick_credential(viewer);
                let owned_thread = thread.clone();
                let known_id = known_id.map(str::to_string);
                self.inflight
                    .run_or_join(thread.clone(), move || {
                        resolve_miss(shared, batcher, config, source, owned_thread, known_id)
                            .boxed()
                    })
                    .await
            }
        };

        self.present(thread, viewer, resolution).await
    }

    /// Credential used for the upstream fetch and whether its result may populate the shared layer.
    fn pick_credential(&self, viewer: Option<&Credential>) -> Option<(Credential, bool)> {
        match (viewer, self.fallback.as_ref()) {
            (Some(viewer), _) => Some((viewer.clone(), true)),
            (None, Some(fallback)) => Some((fallback.clone(), self.config.populate_from_fallback)),
            (None, None) => None,
        }
    }

    async fn present(
        &self,
        thread: &ThreadKey,
        viewer: Option<&Credential>,
        resolution: Resolution,
    ) -> ThreadView {
        let Resolution {
            payload,
            cache,
            max_age,
            fetched_by,
        } = resolution;

        let Some(raw) = payload else {
            return ThreadView {
                payload: None,
                cache,
                max_age: None,
                personalized: viewer.is_some(),
                reactions: None,
            };
        };

        let mut payload = raw.clone();
        sanitize_for_shared(&mut payload);

        let reactions = match viewer {
            Some(viewer) => {
                let own_fetch = fetched_by.is_some_and(|by| by == viewer.fingerprint());
                let path = self
                    .overlay
                    .personalize(thread, viewer, &mut payload, own_fetch.then_some(&raw))
                    .await;
                Some(path)
            }
            None => None,
        };

        ThreadView {
            payload: Some(payload),
            cache,
            max_age,
            personalized: viewer.is_some(),
            reactions,
        }
    }
}

async fn resolve_miss(
    shared: SharedCache,
    batcher: Arc<FetchBatcher>,
    config: CacheConfig,
    source: Option<(Credential, bool)>,
    thread: ThreadKey,
    known_id: Option<String>,
) -> Resolution {
    let Some((credential, authoritative)) = source else {
        debug!(thread = %thread, "No credential available for anonymous miss");
        return Resolution::unavailable();
    };

    let lookup = match known_id {
        Some(id) => {
            let request = FetchRequest::ById {
                id,
                thread: thread.clone(),
            };
            match batcher.fetch(&credential, request).await {
                Some(Lookup::NotFound) => {
                    debug!(
                        thread = %thread,
                        "Known id did not resolve to this page; searching by title"
                    );
                    batcher
                        .fetch(&credential, FetchRequest::ByTitle(thread.clone()))
                        .await
                }
                other => other,
            }
        }
        None => {
            batcher
                .fetch(&credential, FetchRequest::ByTitle(thread.clone()))
                .await
        }
    };

    let Some(lookup) = lookup else {
        return Resolution::unavailable();
    };

    let ttl = if lookup.is_found() {
        config.shared_ttl()
    } else {
        config.not_found_ttl()
    };
    let payload = lookup.into_payload();

    if !authoritative {
        return Resolution {
            payload: Some(payload),
            cache: CacheStatus::Bypass,
            max_age: None,
            fetched_by: Some(credential.fingerprint()),
        };
    }

    let max_age = match shared.put(&thread, payload.clone(), ttl).await {
        Ok(_) => Some(ttl),
        Err(err) => {
            warn!(
                source = SOURCE,
                thread = %thread,
                error = %err,
                "Failed to populate shared cache"
            );
            None
        }
    };

    Resolution {
        payload: Some(payload),
        cache: CacheStatus::Miss,
        max_age,
        fetched_by: Some(credential.fingerprint()),
    }
}
