//! Singleflight de-duplication for concurrent identical work.
//!
//! The first caller for a key starts the work; callers arriving while it is
//! pending join the same shared future and receive a clone of its output.
//! The marker is cleared as soon as any participant observes completion.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use tracing::debug;

use crate::cache::mutex_lock;

const SOURCE: &str = "application::inflight";
const METRIC_INFLIGHT_JOINED: &str = "marginalia_inflight_joined_total";

struct Pending<V: Clone> {
    id: u64,
    future: Shared<BoxFuture<'static, V>>,
}

pub struct InFlight<K, V: Clone> {
    pending: Mutex<HashMap<K, Pending<V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for InFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run the future produced by `start` once per key; concurrent callers share its output.
    ///
    /// The work is owned by the shared future, so a cancelled leader does not
    /// strand the callers that joined it.
    pub async fn run_or_join<F>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let (id, future) = {
            let mut pending = mutex_lock(&self.pending, SOURCE, "run_or_join");
            match pending.get(&key) {
                Some(existing) => {
                    counter!(METRIC_INFLIGHT_JOINED).increment(1);
                    debug!(outcome = "joined", "Joining in-flight fetch");
                    (existing.id, existing.future.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = start().shared();
                    pending.insert(
                        key.clone(),
                        Pending {
                            id,
                            future: future.clone(),
                        },
                    );
                    (id, future)
                }
            }
        };

        let output = future.await;
        self.finish(&key, id);
        output
    }

    /// Number of keys with work still pending.
    pub fn len(&self) -> usize {
        mutex_lock(&self.pending, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn finish(&self, key: &K, id: u64) {
        let mut pending = mutex_lock(&self.pending, SOURCE, "finish");
        if pending.get(key).is_some_and(|entry| entry.id == id) {
            pending.remove(key);
        }
    }
}
