#![allow(dead_code)]

//! Shared fixtures: an in-memory discussion API and a fully wired service.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use marginalia::application::batch::FetchBatcher;
use marginalia::application::coordinator::RequestCoordinator;
use marginalia::application::discussions::DiscussionService;
use marginalia::application::remote::{DiscussionApi, FetchRequest, Lookup};
use marginalia::cache::{
    CacheConfig, CacheMutator, ManualClock, MemoryKv, SharedCache, UserReactionOverlay,
};
use marginalia::domain::credential::Credential;
use marginalia::domain::reactions::{ViewerReactions, apply_count_delta};
use marginalia::domain::thread::ThreadKey;
use marginalia_api_types::{Comment, DiscussionPayload, ReactionContent, ReactionGroup, Reply};
use time::OffsetDateTime;
use time::macros::datetime;

pub const START: OffsetDateTime = datetime!(2026-03-01 12:00 UTC);

pub fn thread(path: &str) -> ThreadKey {
    ThreadKey::new(path, "Notes").expect("thread key")
}

pub fn credential(token: &str) -> Credential {
    Credential::new(token).expect("credential")
}

pub fn comment(id: &str, body: &str) -> Comment {
    Comment {
        id: id.to_string(),
        body: body.to_string(),
        author: "octocat".to_string(),
        author_avatar: "https://avatars.example/octocat".to_string(),
        created_at: START,
        reaction_groups: Vec::new(),
        replies: Vec::new(),
    }
}

pub fn group(kind: ReactionContent, count: u32) -> ReactionGroup {
    ReactionGroup {
        content: kind,
        count,
        viewer_has_reacted: false,
    }
}

/// Upstream call counters.
#[derive(Debug, Default)]
pub struct Calls {
    pub find_by_title: AtomicUsize,
    pub fetch_by_id: AtomicUsize,
    pub fetch_many: AtomicUsize,
    pub viewer_reactions: AtomicUsize,
    pub create_thread: AtomicUsize,
    pub add_comment: AtomicUsize,
    pub add_reply: AtomicUsize,
    pub reactions: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct State {
    threads: HashMap<ThreadKey, DiscussionPayload>,
    /// Reactions per token, per subject.
    reacted: HashMap<String, HashMap<String, BTreeSet<ReactionContent>>>,
    next_id: usize,
}

/// An in-memory stand-in for the remote discussion API.
///
/// Viewer flags on fetched payloads reflect the calling credential, as they
/// do upstream. `set_offline(true)` makes every call fail.
#[derive(Default)]
pub struct ScriptedApi {
    state: Mutex<State>,
    offline: AtomicBool,
    pub calls: Calls,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Seed a thread; returns its discussion id.
    pub fn seed(&self, thread: &ThreadKey, comments: Vec<Comment>) -> String {
        let mut state = self.state.lock().expect("state");
        state.next_id += 1;
        let id = format!("D_{}", state.next_id);
        state.threads.insert(
            thread.clone(),
            DiscussionPayload {
                discussion_id: Some(id.clone()),
                comments,
            },
        );
        id
    }

    /// Record that `token` has reacted with `kind` on `subject_id`, bumping the count.
    pub fn seed_reaction(&self, token: &str, subject_id: &str, kind: ReactionContent) {
        let mut state = self.state.lock().expect("state");
        Self::toggle(&mut state, token, subject_id, kind, 1);
    }

    fn online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    fn toggle(
        state: &mut State,
        token: &str,
        subject_id: &str,
        kind: ReactionContent,
        delta: i64,
    ) -> bool {
        let exists = state.threads.values_mut().any(|payload| {
            payload
                .subject_groups_mut(subject_id)
                .map(|groups| apply_count_delta(groups, kind, delta))
                .is_some()
        });
        if !exists {
            return false;
        }
        let kinds = state
            .reacted
            .entry(token.to_string())
            .or_default()
            .entry(subject_id.to_string())
            .or_default();
        if delta > 0 {
            kinds.insert(kind);
        } else {
            kinds.remove(&kind);
        }
        true
    }

    fn view_as(state: &State, token: &str, payload: &DiscussionPayload) -> DiscussionPayload {
        let mut payload = payload.clone();
        let reacted = state.reacted.get(token);
        payload.for_each_subject_mut(|id, groups| {
            let kinds = reacted.and_then(|subjects| subjects.get(id));
            for group in groups.iter_mut() {
                group.viewer_has_reacted =
                    kinds.is_some_and(|kinds| kinds.contains(&group.content));
            }
        });
        payload
    }
}

#[async_trait]
impl DiscussionApi for ScriptedApi {
    async fn list_category_ids(&self, _: &Credential) -> Option<HashMap<String, String>> {
        self.online()
            .then(|| HashMap::from([("Notes".to_string(), "DIC_notes".to_string())]))
    }

    async fn find_by_title(&self, credential: &Credential, thread: &ThreadKey) -> Option<Lookup> {
        self.calls.find_by_title.fetch_add(1, Ordering::SeqCst);
        if !self.online() {
            return None;
        }
        let state = self.state.lock().expect("state");
        Some(match state.threads.get(thread) {
            Some(payload) => Lookup::Found(Self::view_as(&state, credential.secret(), payload)),
            None => Lookup::NotFound,
        })
    }

    async fn fetch_by_id(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        discussion_id: &str,
    ) -> Option<Lookup> {
        self.calls.fetch_by_id.fetch_add(1, Ordering::SeqCst);
        if !self.online() {
            return None;
        }
        let state = self.state.lock().expect("state");
        let found = state
            .threads
            .iter()
            .find(|(key, payload)| {
                payload.discussion_id.as_deref() == Some(discussion_id)
                    && key.page_path() == thread.page_path()
            })
            .map(|(_, payload)| payload);
        Some(match found {
            Some(payload) => Lookup::Found(Self::view_as(&state, credential.secret(), payload)),
            None => Lookup::NotFound,
        })
    }

    async fn fetch_many(
        &self,
        credential: &Credential,
        requests: &[FetchRequest],
    ) -> Vec<Option<Lookup>> {
        self.calls.fetch_many.fetch_add(1, Ordering::SeqCst);
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.fetch_one(credential, request).await);
        }
        results
    }

    async fn fetch_viewer_reactions(
        &self,
        credential: &Credential,
        subject_ids: &[String],
    ) -> Option<ViewerReactions> {
        self.calls.viewer_reactions.fetch_add(1, Ordering::SeqCst);
        if !self.online() {
            return None;
        }
        let state = self.state.lock().expect("state");
        let mut reactions = ViewerReactions::new();
        if let Some(subjects) = state.reacted.get(credential.secret()) {
            for id in subject_ids {
                for kind in subjects.get(id).into_iter().flatten() {
                    reactions.insert(id.clone(), *kind);
                }
            }
        }
        Some(reactions)
    }

    async fn create_thread(
        &self,
        _: &Credential,
        thread: &ThreadKey,
        _body: &str,
    ) -> Option<String> {
        self.calls.create_thread.fetch_add(1, Ordering::SeqCst);
        if !self.online() {
            return None;
        }
        Some(self.seed(thread, Vec::new()))
    }

    async fn add_comment(
        &self,
        _: &Credential,
        discussion_id: &str,
        body: &str,
    ) -> Option<Comment> {
        self.calls.add_comment.fetch_add(1, Ordering::SeqCst);
        if !self.online() {
            return None;
        }
        let mut state = self.state.lock().expect("state");
        state.next_id += 1;
        let created = comment(&format!("C_{}", state.next_id), body);
        let payload = state
            .threads
            .values_mut()
            .find(|payload| payload.discussion_id.as_deref() == Some(discussion_id))?;
        payload.comments.push(created.clone());
        Some(created)
    }

    async fn add_reply(
        &self,
        _: &Credential,
        discussion_id: &str,
        parent_id: &str,
        body: &str,
    ) -> Option<Reply> {
        self.calls.add_reply.fetch_add(1, Ordering::SeqCst);
        if !self.online() {
            return None;
        }
        let mut state = self.state.lock().expect("state");
        state.next_id += 1;
        let reply = Reply {
            id: format!("R_{}", state.next_id),
            body: body.to_string(),
            author: "octocat".to_string(),
            author_avatar: "https://avatars.example/octocat".to_string(),
            created_at: START,
            reaction_groups: Vec::new(),
        };
        let parent = state
            .threads
            .values_mut()
            .filter(|payload| payload.discussion_id.as_deref() == Some(discussion_id))
            .flat_map(|payload| payload.comments.iter_mut())
            .find(|comment| comment.id == parent_id)?;
        parent.replies.push(reply.clone());
        Some(reply)
    }

    async fn add_reaction(
        &self,
        credential: &Credential,
        subject_id: &str,
        kind: ReactionContent,
    ) -> bool {
        self.calls.reactions.fetch_add(1, Ordering::SeqCst);
        if !self.online() {
            return false;
        }
        let mut state = self.state.lock().expect("state");
        Self::toggle(&mut state, credential.secret(), subject_id, kind, 1)
    }

    async fn remove_reaction(
        &self,
        credential: &Credential,
        subject_id: &str,
        kind: ReactionContent,
    ) -> bool {
        self.calls.reactions.fetch_add(1, Ordering::SeqCst);
        if !self.online() {
            return false;
        }
        let mut state = self.state.lock().expect("state");
        Self::toggle(&mut state, credential.secret(), subject_id, kind, -1)
    }
}

/// The read and write paths wired over [`ScriptedApi`] and [`MemoryKv`].
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub kv: Arc<MemoryKv>,
    pub api: Arc<ScriptedApi>,
    pub shared: SharedCache,
    pub service: Arc<DiscussionService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CacheConfig::default(), None)
    }

    pub fn with(config: CacheConfig, fallback: Option<Credential>) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let kv = Arc::new(MemoryKv::new(clock.clone()));
        let api = Arc::new(ScriptedApi::new());

        let shared = SharedCache::new(kv.clone(), clock.clone(), config.clone());
        let overlay = Arc::new(UserReactionOverlay::new(
            kv.clone(),
            clock.clone(),
            api.clone(),
            config.clone(),
        ));
        let batcher = Arc::new(FetchBatcher::new(api.clone(), config.batching));
        let coordinator = Arc::new(RequestCoordinator::new(
            shared.clone(),
            overlay.clone(),
            batcher,
            fallback,
        ));
        let mutator = CacheMutator::new(shared.clone(), overlay);
        let service = Arc::new(DiscussionService::new(api.clone(), coordinator, mutator));

        Self {
            clock,
            kv,
            api,
            shared,
            service,
        }
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    /// Whether a per-user entry is stored for `token` on any thread.
    pub fn has_user_entry(&self, token: &str) -> bool {
        let fingerprint = credential(token).fingerprint();
        self.kv
            .keys()
            .iter()
            .any(|key| key.contains(":user:") && key.ends_with(fingerprint.as_str()))
    }
}

/// The reaction count of `kind` on `subject_id`, or 0 when absent.
pub fn count_of(payload: &DiscussionPayload, subject_id: &str, kind: ReactionContent) -> u32 {
    let mut count = 0;
    payload.for_each_subject(|id, groups| {
        if id == subject_id {
            count = groups
                .iter()
                .find(|group| group.content == kind)
                .map_or(0, |group| group.count);
        }
    });
    count
}

/// Whether the payload marks `kind` on `subject_id` as reacted by the viewer.
pub fn reacted(payload: &DiscussionPayload, subject_id: &str, kind: ReactionContent) -> bool {
    let mut reacted = false;
    payload.for_each_subject(|id, groups| {
        if id == subject_id {
            reacted = groups
                .iter()
                .any(|group| group.content == kind && group.viewer_has_reacted);
        }
    });
    reacted
}

/// Whether any viewer flag is set anywhere in the payload.
pub fn any_flag(payload: &DiscussionPayload) -> bool {
    let mut any = false;
    payload.for_each_subject(|_, groups| {
        any |= groups.iter().any(|group| group.viewer_has_reacted);
    });
    any
}
