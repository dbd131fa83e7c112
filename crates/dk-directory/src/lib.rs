//! Peer directory (spec.md C4): a threadsafe `user_id -> signing_public_key`
//! cache with coalesced fetch-on-miss against the relay.
//!
//! Grounded on the teacher's `mesh-coordinator/src/registry.rs` (an
//! `Arc<RwLock<HashMap<...>>>` registry with bookkeeping helpers) and
//! `ambient-node/src/reputation.rs`'s small-struct style.

pub mod error;
pub mod fetcher;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};

pub use error::{DirectoryError, DirectoryResult};
pub use fetcher::{HttpRelayKeyFetcher, RelayKeyFetcher};

const FETCH_DEADLINE: Duration = Duration::from_secs(5);

/// `user_id -> signing public key`. Insertion-unique: once a user_id is
/// cached it is never overwritten by a later fetch, since signing keys are
/// durable identities per spec.md §4.3.
pub struct PeerDirectory {
    cache: RwLock<HashMap<String, Vec<u8>>>,
    in_flight: Mutex<HashMap<String, Arc<Notify>>>,
    fetcher: Arc<dyn RelayKeyFetcher>,
}

impl PeerDirectory {
    pub fn new(fetcher: Arc<dyn RelayKeyFetcher>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            fetcher,
        }
    }

    /// Insert a known peer key directly (e.g. our own identity, or a key
    /// learned from a successful handshake). A no-op if the user_id is
    /// already cached.
    pub async fn insert(&self, user_id: impl Into<String>, signing_public_key: Vec<u8>) {
        let user_id = user_id.into();
        let mut cache = self.cache.write().await;
        cache.entry(user_id).or_insert(signing_public_key);
    }

    pub async fn cached(&self, user_id: &str) -> Option<Vec<u8>> {
        self.cache.read().await.get(user_id).cloned()
    }

    /// Resolve `user_id`'s signing public key, fetching from the relay on a
    /// cache miss. Concurrent misses for the same `user_id` coalesce into a
    /// single relay request: the first caller performs the fetch and wakes
    /// every other waiter via `Notify`.
    pub async fn resolve(&self, user_id: &str) -> DirectoryResult<Vec<u8>> {
        if let Some(key) = self.cached(user_id).await {
            return Ok(key);
        }

        let notify = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(existing) = in_flight.get(user_id) {
                Some(existing.clone())
            } else {
                in_flight.insert(user_id.to_string(), Arc::new(Notify::new()));
                None
            }
        };

        if let Some(notify) = notify {
            // Someone else is already fetching this id; wait for them.
            notify.notified().await;
            return self
                .cached(user_id)
                .await
                .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()));
        }

        let result = self.fetch_and_cache(user_id).await;

        let notify = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.remove(user_id)
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        result
    }

    async fn fetch_and_cache(&self, user_id: &str) -> DirectoryResult<Vec<u8>> {
        let fetch = self.fetcher.fetch_signing_key(user_id);
        let key = tokio::time::timeout(FETCH_DEADLINE, fetch)
            .await
            .map_err(|_| DirectoryError::FetchTimeout(user_id.to_string()))?
            .map_err(DirectoryError::FetchFailed)?;

        tracing::info!(%user_id, "resolved peer signing key from relay");
        self.insert(user_id.to_string(), key.clone()).await;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        key: Vec<u8>,
    }

    #[async_trait]
    impl RelayKeyFetcher for CountingFetcher {
        async fn fetch_signing_key(&self, _user_id: &str) -> anyhow::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(self.key.clone())
        }
    }

    #[tokio::test]
    async fn resolve_caches_after_first_fetch() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            key: vec![1, 2, 3],
        });
        let directory = PeerDirectory::new(fetcher.clone());

        let first = directory.resolve("alice").await.unwrap();
        let second = directory.resolve("alice").await.unwrap();

        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![1, 2, 3]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_to_one_fetch() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            key: vec![9, 9, 9],
        });
        let directory = Arc::new(PeerDirectory::new(fetcher.clone()));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let directory = directory.clone();
            handles.push(tokio::spawn(async move { directory.resolve("bob").await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), vec![9, 9, 9]);
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn insert_does_not_overwrite_existing_entry() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            key: vec![0],
        });
        let directory = PeerDirectory::new(fetcher);
        directory.insert("carol", vec![7, 7, 7]).await;
        directory.insert("carol", vec![8, 8, 8]).await;
        assert_eq!(directory.cached("carol").await, Some(vec![7, 7, 7]));
    }
}
