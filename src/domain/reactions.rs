//! Reaction aggregates and the viewer's personal reaction state.
//!
//! Shared payloads carry aggregate counts only; which groups the current
//! viewer has reacted to is kept in a separate, sparse [`ViewerReactions`]
//! map and overlaid per request.

use std::collections::{BTreeMap, BTreeSet};

use marginalia_api_types::{DiscussionPayload, ReactionContent, ReactionGroup};
use serde::{Deserialize, Serialize};

type WireReactions = BTreeMap<String, BTreeMap<ReactionContent, bool>>;

/// Reaction kinds one viewer has placed, per subject (comment or reply) id.
///
/// Serialized as `{subjectId: {KIND: true}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireReactions", into = "WireReactions")]
pub struct ViewerReactions {
    subjects: BTreeMap<String, BTreeSet<ReactionContent>>,
}

impl ViewerReactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subject_id: impl Into<String>, kind: ReactionContent) {
        self.subjects
            .entry(subject_id.into())
            .or_default()
            .insert(kind);
    }

    pub fn kinds(&self, subject_id: &str) -> Option<&BTreeSet<ReactionContent>> {
        self.subjects.get(subject_id)
    }

    pub fn contains(&self, subject_id: &str, kind: ReactionContent) -> bool {
        self.kinds(subject_id)
            .is_some_and(|kinds| kinds.contains(&kind))
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }
}

impl From<WireReactions> for ViewerReactions {
    fn from(wire: WireReactions) -> Self {
        let subjects = wire
            .into_iter()
            .filter_map(|(subject, kinds)| {
                let kinds: BTreeSet<_> = kinds
                    .into_iter()
                    .filter_map(|(kind, reacted)| reacted.then_some(kind))
                    .collect();
                (!kinds.is_empty()).then_some((subject, kinds))
            })
            .collect();
        Self { subjects }
    }
}

impl From<ViewerReactions> for WireReactions {
    fn from(reactions: ViewerReactions) -> Self {
        reactions
            .subjects
            .into_iter()
            .map(|(subject, kinds)| (subject, kinds.into_iter().map(|k| (k, true)).collect()))
            .collect()
    }
}

/// Drop empty groups and restore canonical order.
pub fn canonicalize(groups: &mut Vec<ReactionGroup>) {
    groups.retain(|group| group.count > 0 || group.viewer_has_reacted);
    groups.sort_by_key(|group| group.content);
}

/// Make a payload safe for the cross-user cache: no group may claim the viewer reacted.
pub fn sanitize_for_shared(payload: &mut DiscussionPayload) {
    payload.for_each_subject_mut(|_, groups| {
        for group in groups.iter_mut() {
            group.viewer_has_reacted = false;
        }
        canonicalize(groups);
    });
}

/// Collect the viewer flags of a payload fetched with that viewer's credential.
pub fn extract_reactions(payload: &DiscussionPayload) -> ViewerReactions {
    let mut reactions = ViewerReactions::new();
    payload.for_each_subject(|subject_id, groups| {
        for group in groups.iter().filter(|group| group.viewer_has_reacted) {
            reactions.insert(subject_id, group.content);
        }
    });
    reactions
}

/// Rewrite every `viewer_has_reacted` flag to exactly the given viewer state.
///
/// A reacted kind missing from a stale shared payload is inserted with a count
/// of one, since the viewer's own reaction is known to exist.
pub fn overlay(payload: &mut DiscussionPayload, reactions: &ViewerReactions) {
    payload.for_each_subject_mut(|subject_id, groups| {
        let mine = reactions.kinds(subject_id);
        for group in groups.iter_mut() {
            group.viewer_has_reacted = mine.is_some_and(|kinds| kinds.contains(&group.content));
            if group.viewer_has_reacted && group.count == 0 {
                group.count = 1;
            }
        }
        if let Some(kinds) = mine {
            for kind in kinds {
                if !groups.iter().any(|group| group.content == *kind) {
                    groups.push(ReactionGroup {
                        content: *kind,
                        count: 1,
                        viewer_has_reacted: true,
                    });
                }
            }
        }
        canonicalize(groups);
    });
}

/// Adjust the aggregate count of `kind` by `delta`, clamping at zero.
///
/// An absent group is only created for positive deltas. Returns whether the
/// groups were changed.
pub fn apply_count_delta(
    groups: &mut Vec<ReactionGroup>,
    kind: ReactionContent,
    delta: i64,
) -> bool {
    match groups.iter_mut().find(|group| group.content == kind) {
        Some(group) => {
            let next = (i64::from(group.count) + delta).clamp(0, i64::from(u32::MAX));
            group.count = u32::try_from(next).unwrap_or(u32::MAX);
        }
        None if delta > 0 => groups.push(ReactionGroup {
            content: kind,
            count: u32::try_from(delta).unwrap_or(u32::MAX),
            viewer_has_reacted: false,
        }),
        None => return false,
    }
    canonicalize(groups);
    true
}
