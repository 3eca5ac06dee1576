//! Write-triggered cache maintenance.
//!
//! Reaction toggles patch the shared aggregate in place; structural writes
//! (new comment or reply) purge it. Either way the writer's own reaction
//! state is dropped so their next read re-resolves it.

use std::sync::Arc;

use marginalia_api_types::ReactionContent;
use metrics::counter;
use tracing::debug;

use crate::domain::credential::Credential;
use crate::domain::reactions::apply_count_delta;
use crate::domain::thread::ThreadKey;

use super::kv::KvError;
use super::overlay::UserReactionOverlay;
use super::shared::SharedCache;

const METRIC_CACHE_PATCH: &str = "marginalia_cache_patch_total";

/// What an invalidation removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub shared_purged: bool,
    pub user_purged: bool,
}

#[derive(Clone)]
pub struct CacheMutator {
    shared: SharedCache,
    overlay: Arc<UserReactionOverlay>,
}

impl CacheMutator {
    pub fn new(shared: SharedCache, overlay: Arc<UserReactionOverlay>) -> Self {
        Self { shared, overlay }
    }

    /// Adjust one reaction count inside the cached shared payload.
    ///
    /// The entry keeps its original `cached_at` and is re-stored for its
    /// remaining lifetime only. Returns `false` when there is no live entry,
    /// the subject is not in it, or nothing changed.
    pub async fn patch_reaction_count(
        &self,
        thread: &ThreadKey,
        subject_id: &str,
        kind: ReactionContent,
        delta: i64,
    ) -> Result<bool, KvError> {
        let Some(mut entry) = self.shared.load(thread).await else {
            return Ok(self.record_patch(thread, "no_entry"));
        };
        let Some(remaining) = self.shared.remaining_ttl(&entry) else {
            return Ok(self.record_patch(thread, "expired"));
        };
        let Some(groups) = entry.payload.subject_groups_mut(subject_id) else {
            return Ok(self.record_patch(thread, "no_subject"));
        };
        if !apply_count_delta(groups, kind, delta) {
            return Ok(self.record_patch(thread, "unchanged"));
        }

        self.shared.store_entry(thread, &entry, remaining).await?;
        counter!(METRIC_CACHE_PATCH, "outcome" => "applied").increment(1);
        debug!(
            cache = "shared",
            outcome = "patched",
            thread = %thread,
            subject_id,
            reaction = %kind,
            delta,
            remaining_secs = remaining.as_secs()
        );
        Ok(true)
    }

    /// Purge the caller's reaction state and, for structural writes, the shared entry.
    pub async fn invalidate(
        &self,
        thread: &ThreadKey,
        credential: Option<&Credential>,
        shared_also: bool,
    ) -> Result<Invalidation, KvError> {
        let mut outcome = Invalidation::default();
        if let Some(credential) = credential {
            outcome.user_purged = self.overlay.invalidate(thread, credential).await?;
        }
        if shared_also {
            outcome.shared_purged = self.shared.purge(thread).await?;
        }
        Ok(outcome)
    }

    fn record_patch(&self, thread: &ThreadKey, outcome: &'static str) -> bool {
        counter!(METRIC_CACHE_PATCH, "outcome" => outcome).increment(1);
        debug!(cache = "shared", outcome = "patch_skipped", reason = outcome, thread = %thread);
        false
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use marginalia_api_types::{Comment, DiscussionPayload, ReactionGroup, Reply};
    use time::macros::datetime;

    use crate::application::remote::{DiscussionApi, Lookup};
    use crate::cache::clock::{Clock, ManualClock};
    use crate::cache::config::CacheConfig;
    use crate::cache::kv::MemoryKv;
    use crate::domain::reactions::ViewerReactions;

    use super::*;

    struct Offline;

    #[async_trait]
    impl DiscussionApi for Offline {
        async fn list_category_ids(&self, _: &Credential) -> Option<HashMap<String, String>> {
            None
        }
        async fn find_by_title(&self, _: &Credential, _: &ThreadKey) -> Option<Lookup> {
            None
        }
        async fn fetch_by_id(&self, _: &Credential, _: &ThreadKey, _: &str) -> Option<Lookup> {
            None
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
        async fn add_reply(&self, _: &Credential, _: &str, _: &str, _: &str) -> Option<Reply> {
            None
        }
        async fn add_reaction(&self, _: &Credential, _: &str, _: ReactionContent) -> bool {
            false
        }
        async fn remove_reaction(&self, _: &Credential, _: &str, _: ReactionContent) -> bool {
            false
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        shared: SharedCache,
        mutator: CacheMutator,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 12:00 UTC)));
        let kv = Arc::new(MemoryKv::new(clock.clone()));
        let config = CacheConfig::default();
        let shared = SharedCache::new(kv.clone(), clock.clone(), config.clone());
        let overlay = Arc::new(UserReactionOverlay::new(
            kv,
            clock.clone(),
            Arc::new(Offline),
            config,
        ));
        let mutator = CacheMutator::new(shared.clone(), overlay);
        Fixture {
            clock,
            shared,
            mutator,
        }
    }

    fn thread() -> ThreadKey {
        ThreadKey::new("/ch01", "Notes").expect("key")
    }

    fn payload() -> DiscussionPayload {
        DiscussionPayload {
            discussion_id: Some("D_1".to_string()),
            comments: vec![Comment {
                id: "C1".to_string(),
                body: "hi".to_string(),
                author: "alice".to_string(),
                author_avatar: String::new(),
                created_at: datetime!(2024-04-01 09:00 UTC),
                reaction_groups: vec![ReactionGroup {
                    content: ReactionContent::Heart,
                    count: 1,
                    viewer_has_reacted: false,
                }],
                replies: vec![Reply {
                    id: "R1".to_string(),
                    body: "re".to_string(),
                    author: "bob".to_string(),
                    author_avatar: String::new(),
                    created_at: datetime!(2024-04-01 10:00 UTC),
                    reaction_groups: Vec::new(),
                }],
            }],
        }
    }

    #[tokio::test]
    async fn patch_reply_inserts_group_and_keeps_lifetime() {
        let fx = fixture();
        fx.shared
            .put(&thread(), payload(), Duration::from_secs(300))
            .await
            .expect("put");
        fx.clock.advance(Duration::from_secs(120));

        let applied = fx
            .mutator
            .patch_reaction_count(&thread(), "R1", ReactionContent::Rocket, 1)
            .await
            .expect("patch");
        assert!(applied);

        let entry = fx.shared.get(&thread()).await.expect("hit");
        let groups = &entry.payload.comments[0].replies[0].reaction_groups;
        assert_eq!(groups[0].content, ReactionContent::Rocket);
        assert_eq!(groups[0].count, 1);
        assert_eq!(
            entry.remaining_ttl(fx.clock.now()),
            Some(Duration::from_secs(180))
        );

        fx.clock.advance(Duration::from_secs(180));
        assert!(fx.shared.get(&thread()).await.is_none());
    }

    #[tokio::test]
    async fn patch_without_entry_or_subject_is_skipped() {
        let fx = fixture();
        assert!(
            !fx.mutator
                .patch_reaction_count(&thread(), "C1", ReactionContent::Heart, 1)
                .await
                .expect("patch")
        );

        fx.shared
            .put(&thread(), payload(), Duration::from_secs(300))
            .await
            .expect("put");
        assert!(
            !fx.mutator
                .patch_reaction_count(&thread(), "C404", ReactionContent::Heart, 1)
                .await
                .expect("patch")
        );
        assert!(
            !fx.mutator
                .patch_reaction_count(&thread(), "R1", ReactionContent::Eyes, -1)
                .await
                .expect("patch")
        );
    }

    #[tokio::test]
    async fn decrement_below_zero_prunes_group() {
        let fx = fixture();
        fx.shared
            .put(&thread(), payload(), Duration::from_secs(300))
            .await
            .expect("put");

        for _ in 0..3 {
            fx.mutator
                .patch_reaction_count(&thread(), "C1", ReactionContent::Heart, -1)
                .await
                .expect("patch");
        }

        let entry = fx.shared.get(&thread()).await.expect("hit");
        assert!(entry.payload.comments[0].reaction_groups.is_empty());
    }

    #[tokio::test]
    async fn structural_invalidation_purges_both_layers() {
        let fx = fixture();
        fx.shared
            .put(&thread(), payload(), Duration::from_secs(300))
            .await
            .expect("put");
        let viewer = Credential::new("gho_viewer").expect("credential");

        let reaction_only = fx
            .mutator
            .invalidate(&thread(), Some(&viewer), false)
            .await
            .expect("invalidate");
        assert!(!reaction_only.shared_purged);
        assert!(fx.shared.get(&thread()).await.is_some());

        let structural = fx
            .mutator
            .invalidate(&thread(), None, true)
            .await
            .expect("invalidate");
        assert!(structural.shared_purged);
        assert!(!structural.user_purged);
        assert!(fx.shared.get(&thread()).await.is_none());
    }
}
