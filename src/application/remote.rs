//! Remote discussion API port.
//!
//! Every call is made on behalf of a credential. Failures (rate limits,
//! transport errors, malformed responses) are absorbed by the implementation
//! and surface as `None`/`false`, which callers treat as "try later". A thread
//! that does not exist is the distinct, successful [`Lookup::NotFound`].

use std::collections::HashMap;

use async_trait::async_trait;
use marginalia_api_types::{Comment, DiscussionPayload, ReactionContent, Reply};

use crate::domain::credential::Credential;
use crate::domain::reactions::ViewerReactions;
use crate::domain::thread::ThreadKey;

/// Outcome of a successful thread lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The thread exists. Viewer flags reflect the credential used to fetch it.
    Found(DiscussionPayload),
    NotFound,
}

impl Lookup {
    pub fn into_payload(self) -> DiscussionPayload {
        match self {
            Lookup::Found(payload) => payload,
            Lookup::NotFound => DiscussionPayload::empty(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// One thread fetch, either by known id or by exact title search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchRequest {
    /// A client-supplied id, accepted only for a discussion titled with the thread's page path.
    ById { id: String, thread: ThreadKey },
    ByTitle(ThreadKey),
}

#[async_trait]
pub trait DiscussionApi: Send + Sync {
    /// Category name to category id for the configured repository.
    async fn list_category_ids(&self, credential: &Credential) -> Option<HashMap<String, String>>;

    /// Search the thread's category for a discussion titled exactly `page_path`.
    async fn find_by_title(&self, credential: &Credential, thread: &ThreadKey) -> Option<Lookup>;

    /// Fetch a known discussion. One not titled with the thread's page path is
    /// [`Lookup::NotFound`].
    async fn fetch_by_id(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        discussion_id: &str,
    ) -> Option<Lookup>;

    async fn fetch_one(&self, credential: &Credential, request: &FetchRequest) -> Option<Lookup> {
        match request {
            FetchRequest::ById { id, thread } => self.fetch_by_id(credential, thread, id).await,
            FetchRequest::ByTitle(thread) => self.find_by_title(credential, thread).await,
        }
    }

    /// Resolve several fetches; results are positional.
    ///
    /// The default issues them one by one. Implementations that can alias
    /// several lookups into one upstream request should override it.
    async fn fetch_many(
        &self,
        credential: &Credential,
        requests: &[FetchRequest],
    ) -> Vec<Option<Lookup>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.fetch_one(credential, request).await);
        }
        results
    }

    /// Which reactions the credential's user has placed on the given subjects.
    async fn fetch_viewer_reactions(
        &self,
        credential: &Credential,
        subject_ids: &[String],
    ) -> Option<ViewerReactions>;

    /// Create the thread titled with its page path; `body` is the opening text.
    async fn create_thread(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        body: &str,
    ) -> Option<String>;

    async fn add_comment(
        &self,
        credential: &Credential,
        discussion_id: &str,
        body: &str,
    ) -> Option<Comment>;

    async fn add_reply(
        &self,
        credential: &Credential,
        discussion_id: &str,
        parent_id: &str,
        body: &str,
    ) -> Option<Reply>;

    async fn add_reaction(
        &self,
        credential: &Credential,
        subject_id: &str,
        kind: ReactionContent,
    ) -> bool;

    async fn remove_reaction(
        &self,
        credential: &Credential,
        subject_id: &str,
        kind: ReactionContent,
    ) -> bool;
}
