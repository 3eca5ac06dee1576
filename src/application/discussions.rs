//! Discussion read and write orchestration.
//!
//! Writes go straight to the remote API. Once a write succeeds the affected
//! cache entries are patched or purged; maintenance failures are logged and
//! never change the write's outcome.

use std::sync::Arc;

use marginalia_api_types::{
    Comment, PurgeOutcome, ReactionAction, ReactionContent, ReactionResponse, Reply,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheMutator, Invalidation, KvError};
use crate::domain::credential::Credential;
use crate::domain::error::DomainError;
use crate::domain::thread::ThreadKey;

use super::coordinator::{CacheStatus, RequestCoordinator, ThreadView};
use super::remote::DiscussionApi;

const SOURCE: &str = "application::discussions";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("upstream `{operation}` failed; try again later")]
    Upstream { operation: &'static str },
}

impl WriteError {
    fn upstream(operation: &'static str) -> Self {
        Self::Upstream { operation }
    }
}

/// What a purge request should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeRequest {
    /// Drop shared and (when a credential is present) user entries.
    Full,
    /// Drop only the caller's user entry.
    UserOnly,
    /// Patch one reaction count in place and drop the caller's user entry.
    Patch {
        subject_id: String,
        kind: ReactionContent,
        delta: i64,
    },
}

pub struct DiscussionService {
    api: Arc<dyn DiscussionApi>,
    coordinator: Arc<RequestCoordinator>,
    mutator: CacheMutator,
}

impl DiscussionService {
    pub fn new(
        api: Arc<dyn DiscussionApi>,
        coordinator: Arc<RequestCoordinator>,
        mutator: CacheMutator,
    ) -> Self {
        Self {
            api,
            coordinator,
            mutator,
        }
    }

    pub async fn load(
        &self,
        thread: &ThreadKey,
        known_id: Option<&str>,
        viewer: Option<&Credential>,
    ) -> ThreadView {
        self.coordinator.fetch(thread, known_id, viewer).await
    }

    /// Post a top-level comment, creating the thread first if it has none.
    ///
    /// A thread is only created when a lookup positively reports it missing;
    /// an unreachable upstream is an error, never a reason to create.
    pub async fn add_comment(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        body: &str,
        discussion_id: Option<&str>,
        intro: Option<&str>,
    ) -> Result<Comment, WriteError> {
        let body = require_body(body)?;

        let discussion_id = match discussion_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.ensure_thread(credential, thread, intro).await?,
        };

        let comment = self
            .api
            .add_comment(credential, &discussion_id, body)
            .await
            .ok_or_else(|| WriteError::upstream("add_comment"))?;

        self.after_write(thread, credential, true).await;
        Ok(comment)
    }

    pub async fn add_reply(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        discussion_id: &str,
        parent_id: &str,
        body: &str,
    ) -> Result<Reply, WriteError> {
        let body = require_body(body)?;
        if discussion_id.trim().is_empty() || parent_id.trim().is_empty() {
            return Err(DomainError::validation("discussion and parent ids are required").into());
        }

        let reply = self
            .api
            .add_reply(credential, discussion_id.trim(), parent_id.trim(), body)
            .await
            .ok_or_else(|| WriteError::upstream("add_reply"))?;

        self.after_write(thread, credential, true).await;
        Ok(reply)
    }

    /// Toggle a reaction, then patch the shared count and drop the caller's reaction state.
    pub async fn react(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        subject_id: &str,
        kind: ReactionContent,
        action: ReactionAction,
    ) -> Result<ReactionResponse, WriteError> {
        let subject_id = subject_id.trim();
        if subject_id.is_empty() {
            return Err(DomainError::validation("subject id is required").into());
        }

        let (accepted, operation) = match action {
            ReactionAction::Add => (
                self.api.add_reaction(credential, subject_id, kind).await,
                "add_reaction",
            ),
            ReactionAction::Remove => (
                self.api.remove_reaction(credential, subject_id, kind).await,
                "remove_reaction",
            ),
        };
        if !accepted {
            return Err(WriteError::upstream(operation));
        }

        let delta = action.delta();
        if let Err(err) = self
            .mutator
            .patch_reaction_count(thread, subject_id, kind, delta)
            .await
        {
            log_maintenance_failure(thread, "patch", &err);
        }
        self.after_write(thread, credential, false).await;

        Ok(ReactionResponse {
            subject_id: subject_id.to_string(),
            reaction: kind,
            delta,
        })
    }

    /// Explicit cache maintenance requested by a client.
    pub async fn purge(
        &self,
        thread: &ThreadKey,
        viewer: Option<&Credential>,
        request: PurgeRequest,
    ) -> Result<PurgeOutcome, KvError> {
        let (patched, invalidation) = match request {
            PurgeRequest::Full => (false, self.mutator.invalidate(thread, viewer, true).await?),
            PurgeRequest::UserOnly => {
                (false, self.mutator.invalidate(thread, viewer, false).await?)
            }
            PurgeRequest::Patch {
                subject_id,
                kind,
                delta,
            } => {
                let patched = self
                    .mutator
                    .patch_reaction_count(thread, &subject_id, kind, delta)
                    .await?;
                (patched, self.mutator.invalidate(thread, viewer, false).await?)
            }
        };

        info!(
            thread = %thread,
            shared_purged = invalidation.shared_purged,
            user_purged = invalidation.user_purged,
            patched,
            "Cache purge handled"
        );

        Ok(PurgeOutcome {
            shared_purged: invalidation.shared_purged,
            user_purged: invalidation.user_purged,
            patched,
        })
    }

    async fn ensure_thread(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        intro: Option<&str>,
    ) -> Result<String, WriteError> {
        let view = self.coordinator.fetch(thread, None, Some(credential)).await;
        let payload = view
            .payload
            .ok_or_else(|| WriteError::upstream("find_by_title"))?;
        if let Some(id) = payload.discussion_id {
            return Ok(id);
        }

        // A cached "not found" may predate another reader creating the thread.
        if view.cache == CacheStatus::Hit {
            let confirmed = self
                .api
                .find_by_title(credential, thread)
                .await
                .ok_or_else(|| WriteError::upstream("find_by_title"))?;
            if let Some(id) = confirmed.into_payload().discussion_id {
                return Ok(id);
            }
        }

        let intro = intro
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_intro(thread));

        let id = self
            .api
            .create_thread(credential, thread, &intro)
            .await
            .ok_or_else(|| WriteError::upstream("create_thread"))?;
        info!(thread = %thread, discussion_id = %id, "Created discussion thread");
        Ok(id)
    }

    async fn after_write(&self, thread: &ThreadKey, credential: &Credential, structural: bool) {
        match self
            .mutator
            .invalidate(thread, Some(credential), structural)
            .await
        {
            Ok(Invalidation {
                shared_purged,
                user_purged,
            }) => {
                debug!(
                    thread = %thread,
                    structural,
                    shared_purged,
                    user_purged,
                    "Cache maintained after write"
                );
            }
            Err(err) => log_maintenance_failure(thread, "invalidate", &err),
        }
    }
}

fn require_body(body: &str) -> Result<&str, DomainError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(DomainError::validation("body must not be empty"));
    }
    Ok(body)
}

fn default_intro(thread: &ThreadKey) -> String {
    format!("Discussion thread for `{}`.", thread.page_path())
}

fn log_maintenance_failure(thread: &ThreadKey, step: &'static str, err: &KvError) {
    warn!(
        source = SOURCE,
        thread = %thread,
        step,
        error = %err,
        "Cache maintenance after write failed"
    );
}
