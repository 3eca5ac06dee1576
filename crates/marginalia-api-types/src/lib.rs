//! Wire types for the marginalia discussion edge proxy.
//!
//! The JSON shapes here are what `GET /discussions` returns and what the
//! proxy persists in its shared cache, so field names follow the upstream
//! discussion API (`camelCase`, `SCREAMING_SNAKE_CASE` reaction names).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Reaction kinds, declared in the canonical display order of the picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReactionContent {
    ThumbsUp,
    ThumbsDown,
    Heart,
    Laugh,
    Hooray,
    Rocket,
    Eyes,
    Confused,
}

impl ReactionContent {
    pub const ALL: [ReactionContent; 8] = [
        ReactionContent::ThumbsUp,
        ReactionContent::ThumbsDown,
        ReactionContent::Heart,
        ReactionContent::Laugh,
        ReactionContent::Hooray,
        ReactionContent::Rocket,
        ReactionContent::Eyes,
        ReactionContent::Confused,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReactionContent::ThumbsUp => "THUMBS_UP",
            ReactionContent::ThumbsDown => "THUMBS_DOWN",
            ReactionContent::Heart => "HEART",
            ReactionContent::Laugh => "LAUGH",
            ReactionContent::Hooray => "HOORAY",
            ReactionContent::Rocket => "ROCKET",
            ReactionContent::Eyes => "EYES",
            ReactionContent::Confused => "CONFUSED",
        }
    }
}

impl fmt::Display for ReactionContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownReaction(pub String);

impl fmt::Display for UnknownReaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown reaction `{}`", self.0)
    }
}

impl std::error::Error for UnknownReaction {}

impl FromStr for ReactionContent {
    type Err = UnknownReaction;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        ReactionContent::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownReaction(value.to_string()))
    }
}

/// Aggregate count of one reaction kind on a comment or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionGroup {
    pub content: ReactionContent,
    pub count: u32,
    #[serde(default)]
    pub viewer_has_reacted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: String,
    pub body: String,
    pub author: String,
    #[serde(rename = "avatarUrl", alias = "authorAvatar")]
    pub author_avatar: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub reaction_groups: Vec<ReactionGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub author: String,
    #[serde(rename = "avatarUrl", alias = "authorAvatar")]
    pub author_avatar: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub reaction_groups: Vec<ReactionGroup>,
    /// Chronological; only ever appended to.
    #[serde(default)]
    pub replies: Vec<Reply>,
}

/// A resolved discussion thread. `discussion_id == None` means the page has
/// no discussion yet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionPayload {
    pub discussion_id: Option<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl DiscussionPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_found(&self) -> bool {
        self.discussion_id.is_some()
    }

    /// Ids of every comment and reply, comments first, each followed by its replies.
    pub fn subject_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for comment in &self.comments {
            ids.push(comment.id.clone());
            ids.extend(comment.replies.iter().map(|reply| reply.id.clone()));
        }
        ids
    }

    /// Visit the reaction groups of every comment and reply.
    pub fn for_each_subject_mut(&mut self, mut visit: impl FnMut(&str, &mut Vec<ReactionGroup>)) {
        for comment in &mut self.comments {
            visit(&comment.id, &mut comment.reaction_groups);
            for reply in &mut comment.replies {
                visit(&reply.id, &mut reply.reaction_groups);
            }
        }
    }

    pub fn for_each_subject(&self, mut visit: impl FnMut(&str, &[ReactionGroup])) {
        for comment in &self.comments {
            visit(&comment.id, &comment.reaction_groups);
            for reply in &comment.replies {
                visit(&reply.id, &reply.reaction_groups);
            }
        }
    }

    /// Reaction groups of the comment or reply with the given id.
    pub fn subject_groups_mut(&mut self, subject_id: &str) -> Option<&mut Vec<ReactionGroup>> {
        for comment in &mut self.comments {
            if comment.id == subject_id {
                return Some(&mut comment.reaction_groups);
            }
            if let Some(reply) = comment.replies.iter_mut().find(|r| r.id == subject_id) {
                return Some(&mut reply.reaction_groups);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

impl ReactionAction {
    pub fn delta(self) -> i64 {
        match self {
            ReactionAction::Add => 1,
            ReactionAction::Remove => -1,
        }
    }
}

/// Body of `POST /discussions/comments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommentRequest {
    pub path: String,
    pub category: String,
    pub body: String,
    #[serde(default)]
    pub discussion_id: Option<String>,
    /// Opening text used if the thread has to be created first.
    #[serde(default)]
    pub intro: Option<String>,
}

/// Body of `POST /discussions/replies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReplyRequest {
    pub path: String,
    pub category: String,
    pub discussion_id: String,
    pub parent_id: String,
    pub body: String,
}

/// Body of `POST /discussions/reactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub path: String,
    pub category: String,
    pub subject_id: String,
    pub reaction: ReactionContent,
    pub action: ReactionAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionResponse {
    pub subject_id: String,
    pub reaction: ReactionContent,
    pub delta: i64,
}

/// Result of `POST /cache/purge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeOutcome {
    pub shared_purged: bool,
    pub user_purged: bool,
    pub patched: bool,
}
