//! GitHub Discussions GraphQL client.
//!
//! Every public call absorbs its failures: rate limits, transport errors and
//! malformed payloads are logged and surface as `None`/`false`, which callers
//! read as "try later". Not-found is a successful [`Lookup::NotFound`].

mod batch;
mod error;
mod model;
mod queries;

use std::collections::HashMap;

use async_trait::async_trait;
use marginalia_api_types::{Comment, ReactionContent, Reply};
use metrics::counter;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::application::remote::{DiscussionApi, FetchRequest, Lookup};
use crate::config::GithubSettings;
use crate::domain::credential::Credential;
use crate::domain::reactions::ViewerReactions;
use crate::domain::thread::ThreadKey;
use crate::infra::error::InfraError;

pub use error::RemoteError;

use batch::{BatchQuery, pick_by_id, pick_by_title};
use error::absorb;
use model::{
    AddCommentData, CategoriesData, CreateDiscussionData, Directory, GraphqlResponse, NodeData,
    NodesData, RawComment, RawReply, SearchData, collect_viewer_reactions,
};
use queries::{
    ADD_COMMENT_BODY, ADD_REACTION, ADD_REPLY_BODY, BY_ID_BODY, CATEGORIES, CREATE_DISCUSSION,
    REMOVE_REACTION, SEARCH_BODY, VIEWER_REACTIONS, with_comment_fragments,
    with_discussion_fragments, with_reply_fragments,
};

const METRIC_REMOTE_REQUEST: &str = "marginalia_remote_request_total";
const VIEWER_LOOKUP_CHUNK: usize = 100;

pub struct GithubClient {
    http: Client,
    endpoint: Url,
    owner: String,
    repo: String,
    directory: OnceCell<Directory>,
}

impl GithubClient {
    pub fn new(settings: &GithubSettings) -> Result<Self, InfraError> {
        let http = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(InfraError::http_client)?;
        Ok(Self {
            http,
            endpoint: settings.endpoint.clone(),
            owner: settings.owner.clone(),
            repo: settings.repo.clone(),
            directory: OnceCell::new(),
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        operation: &'static str,
        query: &str,
        variables: Value,
    ) -> Result<T, RemoteError> {
        counter!(METRIC_REMOTE_REQUEST, "operation" => operation).increment(1);

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(credential.secret())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(RemoteError::transport)?;

        let status = response.status();
        match status {
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                return Err(RemoteError::RateLimited {
                    status: status.as_u16(),
                });
            }
            StatusCode::UNAUTHORIZED => return Err(RemoteError::Unauthorized),
            _ if !status.is_success() => {
                return Err(RemoteError::Status {
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let bytes = response.bytes().await.map_err(RemoteError::transport)?;
        let envelope: GraphqlResponse<T> = serde_json::from_slice(&bytes)
            .map_err(|err| RemoteError::malformed(format!("undecodable body: {err}")))?;

        if !envelope.errors.is_empty() {
            let messages: Vec<&str> = envelope
                .errors
                .iter()
                .map(|error| error.message.as_str())
                .collect();
            warn!(
                operation,
                errors = ?messages,
                with_data = envelope.data.is_some(),
                "GraphQL response carried errors"
            );
        }

        match envelope.data {
            Some(data) => Ok(data),
            None if envelope
                .errors
                .iter()
                .any(|error| error.kind.as_deref() == Some("RATE_LIMITED")) =>
            {
                Err(RemoteError::RateLimited {
                    status: status.as_u16(),
                })
            }
            None => Err(RemoteError::malformed("response has neither data nor usable errors")),
        }
    }

    /// Repository id and category ids, loaded once per client.
    async fn directory(&self, credential: &Credential) -> Result<&Directory, RemoteError> {
        self.directory
            .get_or_try_init(|| async {
                let data: CategoriesData = self
                    .execute(
                        credential,
                        "list_category_ids",
                        CATEGORIES,
                        json!({ "owner": self.owner, "name": self.repo }),
                    )
                    .await?;
                let directory = data
                    .repository
                    .map(Directory::from)
                    .ok_or_else(|| RemoteError::malformed("repository not visible"))?;
                debug!(
                    categories = directory.categories.len(),
                    "Loaded discussion categories"
                );
                Ok(directory)
            })
            .await
    }

    async fn search(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
    ) -> Result<Lookup, RemoteError> {
        let directory = self.directory(credential).await?;
        let Some(category_id) = directory.categories.get(thread.category()) else {
            debug!(thread = %thread, "Category unknown to repository; no thread can exist");
            return Ok(Lookup::NotFound);
        };

        let data: SearchData = self
            .execute(
                credential,
                "find_by_title",
                &with_discussion_fragments(SEARCH_BODY),
                json!({
                    "owner": self.owner,
                    "name": self.repo,
                    "categoryId": category_id,
                }),
            )
            .await?;
        Ok(pick_by_title(data.repository, thread.page_path()))
    }

    async fn by_id(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        id: &str,
    ) -> Result<Lookup, RemoteError> {
        let data: NodeData = self
            .execute(
                credential,
                "fetch_by_id",
                &with_discussion_fragments(BY_ID_BODY),
                json!({ "id": id }),
            )
            .await?;
        Ok(pick_by_id(data.node, thread.page_path()))
    }

    async fn viewer_reactions(
        &self,
        credential: &Credential,
        subject_ids: &[String],
    ) -> Result<ViewerReactions, RemoteError> {
        let mut reactions = ViewerReactions::new();
        for chunk in subject_ids.chunks(VIEWER_LOOKUP_CHUNK) {
            let data: NodesData = self
                .execute(
                    credential,
                    "fetch_viewer_reactions",
                    VIEWER_REACTIONS,
                    json!({ "ids": chunk }),
                )
                .await?;
            collect_viewer_reactions(data.nodes, &mut reactions);
        }
        Ok(reactions)
    }

    async fn create(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        body: &str,
    ) -> Result<String, RemoteError> {
        let directory = self.directory(credential).await?;
        let category_id = directory
            .categories
            .get(thread.category())
            .ok_or_else(|| RemoteError::UnknownCategory(thread.category().to_string()))?;

        let data: CreateDiscussionData = self
            .execute(
                credential,
                "create_thread",
                CREATE_DISCUSSION,
                json!({
                    "repositoryId": directory.repository_id,
                    "categoryId": category_id,
                    "title": thread.page_path(),
                    "body": body,
                }),
            )
            .await?;
        data.create_discussion
            .and_then(|payload| payload.discussion)
            .map(|discussion| discussion.id)
            .ok_or_else(|| RemoteError::malformed("createDiscussion returned no discussion"))
    }

    async fn comment(
        &self,
        credential: &Credential,
        discussion_id: &str,
        body: &str,
    ) -> Result<Comment, RemoteError> {
        let data: AddCommentData<RawComment> = self
            .execute(
                credential,
                "add_comment",
                &with_comment_fragments(ADD_COMMENT_BODY),
                json!({ "discussionId": discussion_id, "body": body }),
            )
            .await?;
        data.add_discussion_comment
            .and_then(|payload| payload.comment)
            .map(Comment::from)
            .ok_or_else(|| RemoteError::malformed("addDiscussionComment returned no comment"))
    }

    async fn reply(
        &self,
        credential: &Credential,
        discussion_id: &str,
        parent_id: &str,
        body: &str,
    ) -> Result<Reply, RemoteError> {
        let data: AddCommentData<RawReply> = self
            .execute(
                credential,
                "add_reply",
                &with_reply_fragments(ADD_REPLY_BODY),
                json!({
                    "discussionId": discussion_id,
                    "replyToId": parent_id,
                    "body": body,
                }),
            )
            .await?;
        data.add_discussion_comment
            .and_then(|payload| payload.comment)
            .map(Reply::from)
            .ok_or_else(|| RemoteError::malformed("addDiscussionComment returned no reply"))
    }

    async fn toggle(
        &self,
        credential: &Credential,
        operation: &'static str,
        mutation: &str,
        subject_id: &str,
        kind: ReactionContent,
    ) -> Result<(), RemoteError> {
        let _: Value = self
            .execute(
                credential,
                operation,
                mutation,
                json!({ "subjectId": subject_id, "content": kind.as_str() }),
            )
            .await?;
        Ok(())
    }

    async fn many(
        &self,
        credential: &Credential,
        requests: &[FetchRequest],
    ) -> Option<Vec<Option<Lookup>>> {
        let needs_directory = requests
            .iter()
            .any(|request| matches!(request, FetchRequest::ByTitle(_)));
        let directory = if needs_directory {
            absorb("list_category_ids", self.directory(credential).await)
        } else {
            None
        };

        let query = BatchQuery::build(&self.owner, &self.repo, requests, directory);
        if !query.has_selections() {
            return Some(query.route(None));
        }

        let data: HashMap<String, Value> = absorb(
            "fetch_many",
            self.execute(
                credential,
                "fetch_many",
                &query.document,
                query.variables.clone(),
            )
            .await,
        )?;
        Some(query.route(Some(data)))
    }
}

#[async_trait]
impl DiscussionApi for GithubClient {
    async fn list_category_ids(&self, credential: &Credential) -> Option<HashMap<String, String>> {
        absorb(
            "list_category_ids",
            self.directory(credential)
                .await
                .map(|directory| directory.categories.clone()),
        )
    }

    async fn find_by_title(&self, credential: &Credential, thread: &ThreadKey) -> Option<Lookup> {
        absorb("find_by_title", self.search(credential, thread).await)
    }

    async fn fetch_by_id(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        id: &str,
    ) -> Option<Lookup> {
        absorb("fetch_by_id", self.by_id(credential, thread, id).await)
    }

    async fn fetch_many(
        &self,
        credential: &Credential,
        requests: &[FetchRequest],
    ) -> Vec<Option<Lookup>> {
        if let [single] = requests {
            return vec![self.fetch_one(credential, single).await];
        }
        self.many(credential, requests)
            .await
            .unwrap_or_else(|| vec![None; requests.len()])
    }

    async fn fetch_viewer_reactions(
        &self,
        credential: &Credential,
        subject_ids: &[String],
    ) -> Option<ViewerReactions> {
        absorb(
            "fetch_viewer_reactions",
            self.viewer_reactions(credential, subject_ids).await,
        )
    }

    async fn create_thread(
        &self,
        credential: &Credential,
        thread: &ThreadKey,
        body: &str,
    ) -> Option<String> {
        absorb("create_thread", self.create(credential, thread, body).await)
    }

    async fn add_comment(
        &self,
        credential: &Credential,
        discussion_id: &str,
        body: &str,
    ) -> Option<Comment> {
        absorb("add_comment", self.comment(credential, discussion_id, body).await)
    }

    async fn add_reply(
        &self,
        credential: &Credential,
        discussion_id: &str,
        parent_id: &str,
        body: &str,
    ) -> Option<Reply> {
        absorb(
            "add_reply",
            self.reply(credential, discussion_id, parent_id, body).await,
        )
    }

    async fn add_reaction(
        &self,
        credential: &Credential,
        subject_id: &str,
        kind: ReactionContent,
    ) -> bool {
        absorb(
            "add_reaction",
            self.toggle(credential, "add_reaction", ADD_REACTION, subject_id, kind)
                .await,
        )
        .is_some()
    }

    async fn remove_reaction(
        &self,
        credential: &Credential,
        subject_id: &str,
        kind: ReactionContent,
    ) -> bool {
        absorb(
            "remove_reaction",
            self.toggle(credential, "remove_reaction", REMOVE_REACTION, subject_id, kind)
                .await,
        )
        .is_some()
    }
}
