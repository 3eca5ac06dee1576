//! GraphQL documents sent to the discussion API.

pub(super) const REACTION_FIELDS: &str = r#"
fragment ReactionFields on Reactable {
  reactionGroups {
    content
    viewerHasReacted
    reactors { totalCount }
    users { totalCount }
  }
}
"#;

pub(super) const REPLY_FIELDS: &str = r#"
fragment ReplyFields on DiscussionComment {
  id
  body
  createdAt
  author { login avatarUrl }
  ...ReactionFields
}
"#;

pub(super) const COMMENT_FIELDS: &str = r#"
fragment CommentFields on DiscussionComment {
  id
  body
  createdAt
  author { login avatarUrl }
  ...ReactionFields
  replies(first: 50) { nodes { ...ReplyFields } }
}
"#;

pub(super) const DISCUSSION_FIELDS: &str = r#"
fragment DiscussionFields on Discussion {
  id
  title
  comments(first: 100) { nodes { ...CommentFields } }
}
"#;

pub(super) const CATEGORIES: &str = r#"
query Categories($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    id
    discussionCategories(first: 20) { nodes { id name } }
  }
}
"#;

pub(super) const SEARCH_BODY: &str = r#"
query SearchDiscussions($owner: String!, $name: String!, $categoryId: ID!) {
  repository(owner: $owner, name: $name) {
    discussions(first: 50, categoryId: $categoryId, orderBy: {field: CREATED_AT, direction: DESC}) {
      nodes { ...DiscussionFields }
    }
  }
}
"#;

pub(super) const BY_ID_BODY: &str = r#"
query DiscussionById($id: ID!) {
  node(id: $id) { ... on Discussion { ...DiscussionFields } }
}
"#;

pub(super) const VIEWER_REACTIONS: &str = r#"
query ViewerReactions($ids: [ID!]!) {
  nodes(ids: $ids) {
    ... on DiscussionComment {
      id
      reactionGroups { content viewerHasReacted }
    }
  }
}
"#;

pub(super) const CREATE_DISCUSSION: &str = r#"
mutation CreateDiscussion($repositoryId: ID!, $categoryId: ID!, $title: String!, $body: String!) {
  createDiscussion(input: {repositoryId: $repositoryId, categoryId: $categoryId, title: $title, body: $body}) {
    discussion { id }
  }
}
"#;

pub(super) const ADD_COMMENT_BODY: &str = r#"
mutation AddComment($discussionId: ID!, $body: String!) {
  addDiscussionComment(input: {discussionId: $discussionId, body: $body}) {
    comment { ...CommentFields }
  }
}
"#;

pub(super) const ADD_REPLY_BODY: &str = r#"
mutation AddReply($discussionId: ID!, $replyToId: ID!, $body: String!) {
  addDiscussionComment(input: {discussionId: $discussionId, replyToId: $replyToId, body: $body}) {
    comment { ...ReplyFields }
  }
}
"#;

pub(super) const ADD_REACTION: &str = r#"
mutation AddReaction($subjectId: ID!, $content: ReactionContent!) {
  addReaction(input: {subjectId: $subjectId, content: $content}) { reaction { content } }
}
"#;

pub(super) const REMOVE_REACTION: &str = r#"
mutation RemoveReaction($subjectId: ID!, $content: ReactionContent!) {
  removeReaction(input: {subjectId: $subjectId, content: $content}) { reaction { content } }
}
"#;

/// Full document for an operation that selects discussions.
pub(super) fn with_discussion_fragments(body: &str) -> String {
    format!("{body}{DISCUSSION_FIELDS}{COMMENT_FIELDS}{REPLY_FIELDS}{REACTION_FIELDS}")
}

pub(super) fn with_comment_fragments(body: &str) -> String {
    format!("{body}{COMMENT_FIELDS}{REPLY_FIELDS}{REACTION_FIELDS}")
}

pub(super) fn with_reply_fragments(body: &str) -> String {
    format!("{body}{REPLY_FIELDS}{REACTION_FIELDS}")
}
