//! Cache key definitions.
//!
//! Shared and per-user entries live in disjoint namespaces of the same
//! key-value service.

use std::fmt;

use crate::domain::credential::Fingerprint;
use crate::domain::thread::ThreadKey;

const KEY_PREFIX: &str = "marginalia";
const KEY_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Discussion content visible to every reader.
    Shared(ThreadKey),
    /// One viewer's reaction flags for a thread.
    User {
        thread: ThreadKey,
        fingerprint: Fingerprint,
    },
}

impl CacheKey {
    pub fn shared(thread: &ThreadKey) -> Self {
        Self::Shared(thread.clone())
    }

    pub fn user(thread: &ThreadKey, fingerprint: Fingerprint) -> Self {
        Self::User {
            thread: thread.clone(),
            fingerprint,
        }
    }

    pub fn thread(&self) -> &ThreadKey {
        match self {
            Self::Shared(thread) | Self::User { thread, .. } => thread,
        }
    }

    /// Short label for logs and metrics.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Shared(_) => "shared",
            Self::User { .. } => "user",
        }
    }

    /// The key written to the key-value service.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Shared(thread) => format!("{KEY_PREFIX}:shared:{KEY_VERSION}:{thread}"),
            Self::User {
                thread,
                fingerprint,
            } => format!("{KEY_PREFIX}:user:{KEY_VERSION}:{thread}:{fingerprint}"),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}
