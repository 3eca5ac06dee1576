//! Raw response shapes and their conversion into wire payloads.

use std::collections::HashMap;

use marginalia_api_types::{Comment, DiscussionPayload, ReactionContent, ReactionGroup, Reply};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::reactions::{ViewerReactions, canonicalize};

const GHOST_LOGIN: &str = "ghost";

#[derive(Debug, Deserialize)]
pub(super) struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GraphqlError {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<Option<T>>,
}

impl<T> Connection<T> {
    pub fn into_items(self) -> impl Iterator<Item = T> {
        self.nodes.into_iter().flatten()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RawActor {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RawTotal {
    pub total_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RawReactionGroup {
    pub content: String,
    #[serde(default)]
    pub viewer_has_reacted: bool,
    pub reactors: Option<RawTotal>,
    pub users: Option<RawTotal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RawReply {
    pub id: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub author: Option<RawActor>,
    #[serde(default)]
    pub reaction_groups: Vec<RawReactionGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RawComment {
    pub id: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub author: Option<RawActor>,
    #[serde(default)]
    pub reaction_groups: Vec<RawReactionGroup>,
    pub replies: Option<Connection<RawReply>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawDiscussion {
    pub id: String,
    pub title: String,
    pub comments: Option<Connection<RawComment>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CategoriesRepository {
    pub id: String,
    pub discussion_categories: Connection<RawCategory>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CategoriesData {
    pub repository: Option<CategoriesRepository>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DiscussionsRepository {
    pub discussions: Connection<RawDiscussion>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SearchData {
    pub repository: Option<DiscussionsRepository>,
}

#[derive(Debug, Deserialize)]
pub(super) struct NodeData {
    pub node: Option<RawDiscussion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RawViewerGroup {
    pub content: String,
    #[serde(default)]
    pub viewer_has_reacted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RawReactable {
    pub id: Option<String>,
    #[serde(default)]
    pub reaction_groups: Vec<RawViewerGroup>,
}

#[derive(Debug, Deserialize)]
pub(super) struct NodesData {
    #[serde(default)]
    pub nodes: Vec<Option<RawReactable>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreatedDiscussion {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateDiscussionPayload {
    pub discussion: Option<CreatedDiscussion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateDiscussionData {
    pub create_discussion: Option<CreateDiscussionPayload>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AddCommentPayload<T> {
    pub comment: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AddCommentData<T> {
    pub add_discussion_comment: Option<AddCommentPayload<T>>,
}

/// Category directory of one repository.
#[derive(Debug, Clone)]
pub(super) struct Directory {
    pub repository_id: String,
    pub categories: HashMap<String, String>,
}

impl From<CategoriesRepository> for Directory {
    fn from(repository: CategoriesRepository) -> Self {
        let categories = repository
            .discussion_categories
            .into_items()
            .map(|category| (category.name, category.id))
            .collect();
        Self {
            repository_id: repository.id,
            categories,
        }
    }
}

fn parse_kind(raw: &str) -> Option<ReactionContent> {
    match raw.parse() {
        Ok(kind) => Some(kind),
        Err(err) => {
            debug!(error = %err, "Skipping unsupported reaction kind");
            None
        }
    }
}

fn convert_groups(raw: Vec<RawReactionGroup>) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = raw
        .into_iter()
        .filter_map(|group| {
            let content = parse_kind(&group.content)?;
            let count = group
                .reactors
                .or(group.users)
                .map_or(0, |total| total.total_count);
            Some(ReactionGroup {
                content,
                count,
                viewer_has_reacted: group.viewer_has_reacted,
            })
        })
        .collect();
    canonicalize(&mut groups);
    groups
}

fn author_parts(author: Option<RawActor>) -> (String, String) {
    match author {
        Some(actor) => (actor.login, actor.avatar_url),
        None => (GHOST_LOGIN.to_string(), String::new()),
    }
}

impl From<RawReply> for Reply {
    fn from(raw: RawReply) -> Self {
        let (author, author_avatar) = author_parts(raw.author);
        Reply {
            id: raw.id,
            body: raw.body,
            author,
            author_avatar,
            created_at: raw.created_at,
            reaction_groups: convert_groups(raw.reaction_groups),
        }
    }
}

impl From<RawComment> for Comment {
    fn from(raw: RawComment) -> Self {
        let (author, author_avatar) = author_parts(raw.author);
        Comment {
            id: raw.id,
            body: raw.body,
            author,
            author_avatar,
            created_at: raw.created_at,
            reaction_groups: convert_groups(raw.reaction_groups),
            replies: raw
                .replies
                .map(|replies| replies.into_items().map(Reply::from).collect())
                .unwrap_or_default(),
        }
    }
}

impl From<RawDiscussion> for DiscussionPayload {
    fn from(raw: RawDiscussion) -> Self {
        DiscussionPayload {
            discussion_id: Some(raw.id),
            comments: raw
                .comments
                .map(|comments| comments.into_items().map(Comment::from).collect())
                .unwrap_or_default(),
        }
    }
}

/// Collect viewer flags from a `nodes(ids:)` response.
pub(super) fn collect_viewer_reactions(
    nodes: Vec<Option<RawReactable>>,
    into: &mut ViewerReactions,
) {
    for node in nodes.into_iter().flatten() {
        let Some(id) = node.id else {
            continue;
        };
        for group in node.reaction_groups {
            if group.viewer_has_reacted {
                if let Some(kind) = parse_kind(&group.content) {
                    into.insert(id.clone(), kind);
                }
            }
        }
    }
}
