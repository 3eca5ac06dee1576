//! Same-turn fetch batching.
//!
//! Distinct thread fetches issued by the same credential while a flush is
//! pending are merged into one upstream call; each caller receives only its
//! own result. A batch of one is sent as a plain fetch.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use metrics::counter;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cache::mutex_lock;
use crate::domain::credential::{Credential, Fingerprint};

use super::remote::{DiscussionApi, FetchRequest, Lookup};

const SOURCE: &str = "application::batch";
const METRIC_BATCH_FLUSH: &str = "marginalia_batch_flush_total";

type Reply = oneshot::Sender<Option<Lookup>>;

struct PendingBatch {
    credential: Credential,
    calls: Vec<(FetchRequest, Reply)>,
}

pub struct FetchBatcher {
    api: Arc<dyn DiscussionApi>,
    enabled: bool,
    pending: Mutex<HashMap<Fingerprint, PendingBatch>>,
}

impl FetchBatcher {
    pub fn new(api: Arc<dyn DiscussionApi>, enabled: bool) -> Self {
        Self {
            api,
            enabled,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a fetch and wait for its result.
    ///
    /// The flush runs on its own task after yielding once, so every fetch
    /// queued in the meantime rides along and a cancelled caller cannot strand
    /// the others.
    pub async fn fetch(
        self: &Arc<Self>,
        credential: &Credential,
        request: FetchRequest,
    ) -> Option<Lookup> {
        if !self.enabled {
            return self.api.fetch_one(credential, &request).await;
        }

        let fingerprint = credential.fingerprint();
        let (reply, receiver) = oneshot::channel();
        let schedule_flush = {
            let mut pending = mutex_lock(&self.pending, SOURCE, "enqueue");
            match pending.entry(fingerprint.clone()) {
                Entry::Occupied(mut batch) => {
                    batch.get_mut().calls.push((request, reply));
                    false
                }
                Entry::Vacant(slot) => {
                    slot.insert(PendingBatch {
                        credential: credential.clone(),
                        calls: vec![(request, reply)],
                    });
                    true
                }
            }
        };

        if schedule_flush {
            let batcher = Arc::clone(self);
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                batcher.flush(&fingerprint).await;
            });
        }

        receiver.await.unwrap_or_else(|_| {
            warn!(source = SOURCE, "Batched fetch dropped before completion");
            None
        })
    }

    async fn flush(&self, fingerprint: &Fingerprint) {
        let batch = mutex_lock(&self.pending, SOURCE, "flush").remove(fingerprint);
        let Some(PendingBatch { credential, calls }) = batch else {
            return;
        };

        let (requests, replies): (Vec<FetchRequest>, Vec<Reply>) = calls.into_iter().unzip();

        if requests.len() == 1 {
            counter!(METRIC_BATCH_FLUSH, "mode" => "single").increment(1);
            let result = self.api.fetch_one(&credential, &requests[0]).await;
            for reply in replies {
                let _ = reply.send(result.clone());
            }
            return;
        }

        counter!(METRIC_BATCH_FLUSH, "mode" => "batched").increment(1);
        debug!(size = requests.len(), "Flushing batched fetch");
        let mut results = self.api.fetch_many(&credential, &requests).await.into_iter();
        for reply in replies {
            let _ = reply.send(results.next().flatten());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use marginalia_api_types::{Comment, DiscussionPayload, ReactionContent, Reply as ReplyItem};

    use crate::domain::reactions::ViewerReactions;
    use crate::domain::thread::ThreadKey;

    use super::*;

    /// Resolves any id to a discussion with that id and counts calls.
    #[derive(Default)]
    struct Echo {
        single: AtomicUsize,
        many: AtomicUsize,
        largest_batch: AtomicUsize,
    }

    #[async_trait]
    impl DiscussionApi for Echo {
        async fn list_category_ids(&self, _: &Credential) -> Option<HashMap<String, String>> {
            None
        }
        async fn find_by_title(&self, _: &Credential, _: &ThreadKey) -> Option<Lookup> {
            self.single.fetch_add(1, Ordering::SeqCst);
            Some(Lookup::NotFound)
        }
        async fn fetch_by_id(&self, _: &Credential, _: &ThreadKey, id: &str) -> Option<Lookup> {
            self.single.fetch_add(1, Ordering::SeqCst);
            Some(Lookup::Found(DiscussionPayload {
                discussion_id: Some(id.to_string()),
                comments: Vec::new(),
            }))
        }
        async fn fetch_many(
            &self,
            _: &Credential,
            requests: &[FetchRequest],
        ) -> Vec<Option<Lookup>> {
            self.many.fetch_add(1, Ordering::SeqCst);
            self.largest_batch.fetch_max(requests.len(), Ordering::SeqCst);
            requests
                .iter()
                .map(|request| match request {
                    FetchRequest::ById { id, .. } => Some(Lookup::Found(DiscussionPayload {
                        discussion_id: Some(id.clone()),
                        comments: Vec::new(),
                    })),
                    FetchRequest::ByTitle(_) => Some(Lookup::NotFound),
                })
                .collect()
        }
        async fn fetch_viewer_reactions(
            &self,
            _: &Credential,
            _: &[String],
        ) -> Option<ViewerReactions> {
            None
        }
        async fn create_thread(&self, _: &Credential, _: &ThreadKey, _: &str) -> Option<String> {
            None
        }
        async fn add_comment(&self, _: &Credential, _: &str, _: &str) -> Option<Comment> {
            None
        }
        async fn add_reply(&self, _: &Credential, _: &str, _: &str, _: &str) -> Option<ReplyItem> {
            None
        }
        async fn add_reaction(&self, _: &Credential, _: &str, _: ReactionContent) -> bool {
            false
        }
        async fn remove_reaction(&self, _: &Credential, _: &str, _: ReactionContent) -> bool {
            false
        }
    }

    fn credential() -> Credential {
        Credential::new("gho_batch").expect("credential")
    }

    fn by_id(id: &str) -> FetchRequest {
        FetchRequest::ById {
            id: id.to_string(),
            thread: ThreadKey::new("/ch01", "Notes").expect("key"),
        }
    }

    #[tokio::test]
    async fn same_turn_fetches_share_one_upstream_call() {
        let api = Arc::new(Echo::default());
        let batcher = Arc::new(FetchBatcher::new(api.clone(), true));
        let credential = credential();

        let (a, b, c) = tokio::join!(
            batcher.fetch(&credential, by_id("D_a")),
            batcher.fetch(&credential, by_id("D_b")),
            batcher.fetch(
                &credential,
                FetchRequest::ByTitle(ThreadKey::new("/ch02", "Notes").expect("key"))
            ),
        );

        assert_eq!(
            a.and_then(|lookup| lookup.into_payload().discussion_id),
            Some("D_a".to_string())
        );
        assert_eq!(
            b.and_then(|lookup| lookup.into_payload().discussion_id),
            Some("D_b".to_string())
        );
        assert_eq!(c, Some(Lookup::NotFound));
        assert_eq!(api.many.load(Ordering::SeqCst), 1);
        assert_eq!(api.largest_batch.load(Ordering::SeqCst), 3);
        assert_eq!(api.single.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lone_fetch_is_sent_unbatched() {
        let api = Arc::new(Echo::default());
        let batcher = Arc::new(FetchBatcher::new(api.clone(), true));

        let result = batcher
            .fetch(&credential(), by_id("D_only"))
            .await;
        assert!(result.is_some_and(|lookup| lookup.is_found()));
        assert_eq!(api.single.load(Ordering::SeqCst), 1);
        assert_eq!(api.many.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn different_credentials_are_not_merged() {
        let api = Arc::new(Echo::default());
        let batcher = Arc::new(FetchBatcher::new(api.clone(), true));
        let other = Credential::new("gho_other").expect("credential");
        let first = credential();

        let _ = tokio::join!(
            batcher.fetch(&first, by_id("D_a")),
            batcher.fetch(&other, by_id("D_b")),
        );
        assert_eq!(api.single.load(Ordering::SeqCst), 2);
        assert_eq!(api.many.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_batching_fetches_directly() {
        let api = Arc::new(Echo::default());
        let batcher = Arc::new(FetchBatcher::new(api.clone(), false));
        let first = credential();
        let second = credential();

        let _ = tokio::join!(
            batcher.fetch(&first, by_id("D_a")),
            batcher.fetch(&second, by_id("D_b")),
        );
        assert_eq!(api.single.load(Ordering::SeqCst), 2);
        assert_eq!(api.many.load(Ordering::SeqCst), 0);
    }
}
