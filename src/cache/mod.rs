//! Marginalia cache layers.
//!
//! Two namespaces share one key-value service:
//!
//! - **Shared**: discussion payloads keyed by `(category, page path)`, with
//!   aggregate reaction counts only.
//! - **User**: one viewer's reaction flags for a thread, keyed additionally by
//!   a credential fingerprint.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "memory"
//! shared_ttl_seconds = 300
//! user_ttl_seconds = 604800
//! not_found_ttl_seconds = 60
//! # ... see config.rs for all options
//! ```

mod clock;
mod config;
mod entry;
mod keys;
pub mod kv;
mod lock;
mod mutator;
mod overlay;
mod shared;

pub(crate) use lock::mutex_lock;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use entry::{CacheEntry, UserReactionsEntry};
pub use keys::CacheKey;
pub use kv::{KvError, KvStore, MemoryKv};
pub use mutator::{CacheMutator, Invalidation};
pub use overlay::{ResolutionPath, UserReactionOverlay};
pub use shared::SharedCache;
