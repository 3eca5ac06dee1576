//! Stored cache entry envelope.

use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::reactions::ViewerReactions;

/// A cached value plus the bookkeeping needed to preserve its lifetime.
///
/// Serialized flat: the payload's own fields sit next to `_cachedAt` and
/// `_ttl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    #[serde(flatten)]
    pub payload: T,
    #[serde(rename = "_cachedAt", with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    #[serde(rename = "_ttl")]
    pub ttl_secs: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T, cached_at: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            payload,
            cached_at,
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Time since the entry was first stored; zero if the clock went backwards.
    pub fn age(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(now - self.cached_at).unwrap_or(Duration::ZERO)
    }

    /// Lifetime left at `now`, or `None` once exhausted.
    pub fn remaining_ttl(&self, now: OffsetDateTime) -> Option<Duration> {
        self.ttl()
            .checked_sub(self.age(now))
            .filter(|remaining| !remaining.is_zero())
    }

    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        self.remaining_ttl(now).is_some()
    }
}

impl<T: Serialize> CacheEntry<T> {
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Payload of a per-user entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReactionsEntry {
    pub reactions: ViewerReactions,
}

#[cfg(test)]
mod tests {
    use marginalia_api_types::{DiscussionPayload, ReactionContent};
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn shared_entry_wire_shape_is_flat() {
        let entry = CacheEntry::new(
            DiscussionPayload::empty(),
            datetime!(2024-05-01 12:00 UTC),
            Duration::from_secs(60),
        );
        let value: serde_json::Value =
            serde_json::from_slice(&entry.encode().expect("encode")).expect("json");
        assert_eq!(
            value,
            json!({
                "discussionId": null,
                "comments": [],
                "_cachedAt": "2024-05-01T12:00:00Z",
                "_ttl": 60
            })
        );
    }

    #[test]
    fn user_entry_decodes() {
        let raw = json!({
            "reactions": {"C1": {"HEART": true}},
            "_cachedAt": "2024-05-01T12:00:00Z",
            "_ttl": 604800
        });
        let entry: CacheEntry<UserReactionsEntry> =
            CacheEntry::decode(raw.to_string().as_bytes()).expect("decode");
        assert!(entry.payload.reactions.contains("C1", ReactionContent::Heart));
        assert_eq!(entry.ttl(), Duration::from_secs(604_800));
    }

    #[test]
    fn remaining_ttl_counts_down_and_expires() {
        let start = datetime!(2024-05-01 12:00 UTC);
        let entry = CacheEntry::new((), start, Duration::from_secs(300));

        assert_eq!(
            entry.remaining_ttl(start + Duration::from_secs(100)),
            Some(Duration::from_secs(200))
        );
        assert_eq!(entry.remaining_ttl(start + Duration::from_secs(300)), None);
        assert!(!entry.is_fresh(start + Duration::from_secs(301)));
        assert_eq!(entry.age(start - Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(CacheEntry::<DiscussionPayload>::decode(b"not json").is_err());
    }
}
