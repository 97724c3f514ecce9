//! Request-scoped batch loading for entity lookups.
//!
//! Implements the dataloader pattern for preventing N+1 store queries: every
//! id requested while one GraphQL request resolves is coalesced, per
//! scheduling tick, into a single multi-id query, duplicate ids share one
//! fetch, and the cache dies with the request.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use mongodb::bson::oid::ObjectId;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::models::{EventDoc, UserDoc};
use crate::store::{EntityStore, StoreError};

/// Batch loader trait for loading multiple items at once
#[async_trait]
pub trait BatchLoader<K, V>: Send + Sync
where
    K: Send + Sync + Clone + Eq + Hash,
    V: Send + Sync + Clone,
{
    /// Fetch every entity for `keys` in one store query, keyed by id. Keys
    /// with no match are simply absent from the map; the store's result
    /// order never matters because callers look their own key up.
    async fn load_batch(&self, keys: &[K]) -> Result<HashMap<K, V>, StoreError>;
}

/// Failure delivered identically to every caller waiting on one batch.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("{0}")]
    Store(Arc<StoreError>),
    #[error("batch load interrupted")]
    Interrupted,
}

type BatchOutcome<K, V> = Result<Arc<HashMap<K, V>>, LoadError>;

enum Entry<K, V> {
    Done(BatchOutcome<K, V>),
    InFlight(watch::Receiver<Option<BatchOutcome<K, V>>>),
}

struct OpenBatch<K, V> {
    keys: Vec<K>,
    tx: watch::Sender<Option<BatchOutcome<K, V>>>,
}

struct State<K, V> {
    cache: HashMap<K, Entry<K, V>>,
    open: Option<OpenBatch<K, V>>,
}

/// DataLoader with request-scoped caching and same-tick batching.
///
/// The first caller to miss the cache opens a batch and yields once; every
/// sibling lookup scheduled in that tick joins the open batch instead of
/// issuing its own query. The opener then runs one `load_batch` for the
/// accumulated keys and fans the outcome out to all waiters.
pub struct DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    loader: Arc<L>,
    state: Arc<Mutex<State<K, V>>>,
}

impl<K, V, L> DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    /// Create new DataLoader with a batch loader
    pub fn new(loader: L) -> Self {
        Self {
            loader: Arc::new(loader),
            state: Arc::new(Mutex::new(State {
                cache: HashMap::new(),
                open: None,
            })),
        }
    }

    /// Load a single item by key.
    ///
    /// A key already resolved this request returns the cached result; a key
    /// already in flight waits on the same fetch. `Ok(None)` means the store
    /// has no entity for this key.
    pub async fn load(&self, key: K) -> Result<Option<V>, LoadError> {
        let waiter = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let existing = match state.cache.get(&key) {
                Some(Entry::Done(outcome)) => return Self::resolve(outcome.clone(), &key),
                Some(Entry::InFlight(rx)) => Some(rx.clone()),
                None => None,
            };

            match existing {
                Some(rx) => Some(rx),
                None => {
                    if let Some(open) = state.open.as_mut() {
                        open.keys.push(key.clone());
                        let rx = open.tx.subscribe();
                        state.cache.insert(key.clone(), Entry::InFlight(rx.clone()));
                        Some(rx)
                    } else {
                        let (tx, rx) = watch::channel(None);
                        state.cache.insert(key.clone(), Entry::InFlight(rx));
                        state.open = Some(OpenBatch {
                            keys: vec![key.clone()],
                            tx,
                        });
                        None
                    }
                }
            }
        };

        match waiter {
            Some(mut rx) => {
                let outcome = match rx.wait_for(|o| o.is_some()).await {
                    Ok(value) => value.clone(),
                    Err(_) => None,
                };
                match outcome {
                    Some(outcome) => Self::resolve(outcome, &key),
                    None => Err(LoadError::Interrupted),
                }
            }
            None => self.run_batch(&key).await,
        }
    }

    /// Load multiple items by keys, concurrently, preserving request order.
    /// Keys with no matching entity are skipped.
    pub async fn load_many(&self, keys: Vec<K>) -> Result<Vec<V>, LoadError> {
        let results = join_all(keys.into_iter().map(|key| self.load(key))).await;
        let mut values = Vec::with_capacity(results.len());
        for result in results {
            if let Some(value) = result? {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Opener path: give sibling lookups one tick to join, then fetch the
    /// whole batch and publish the shared outcome.
    async fn run_batch(&self, key: &K) -> Result<Option<V>, LoadError> {
        tokio::task::yield_now().await;

        let batch = {
            let mut guard = self.state.lock().await;
            guard.open.take()
        };
        let Some(batch) = batch else {
            return Err(LoadError::Interrupted);
        };

        let outcome: BatchOutcome<K, V> = match self.loader.load_batch(&batch.keys).await {
            Ok(map) => Ok(Arc::new(map)),
            Err(err) => Err(LoadError::Store(Arc::new(err))),
        };

        {
            let mut guard = self.state.lock().await;
            for k in &batch.keys {
                guard.cache.insert(k.clone(), Entry::Done(outcome.clone()));
            }
        }
        let _ = batch.tx.send(Some(outcome.clone()));

        Self::resolve(outcome, key)
    }

    fn resolve(outcome: BatchOutcome<K, V>, key: &K) -> Result<Option<V>, LoadError> {
        match outcome {
            Ok(map) => Ok(map.get(key).cloned()),
            Err(err) => Err(err),
        }
    }
}

impl<K, V, L> Clone for DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
            state: self.state.clone(),
        }
    }
}

/// Bulk user lookup backing lazy `creator` and booking `user` fields.
pub struct UserBatch {
    store: Arc<dyn EntityStore>,
}

#[async_trait]
impl BatchLoader<ObjectId, UserDoc> for UserBatch {
    async fn load_batch(
        &self,
        keys: &[ObjectId],
    ) -> Result<HashMap<ObjectId, UserDoc>, StoreError> {
        let users = self.store.users_by_ids(keys).await?;
        Ok(users.into_iter().map(|user| (user.id, user)).collect())
    }
}

/// Bulk event lookup backing lazy `createdEvents` and booking `event` fields.
pub struct EventBatch {
    store: Arc<dyn EntityStore>,
}

#[async_trait]
impl BatchLoader<ObjectId, EventDoc> for EventBatch {
    async fn load_batch(
        &self,
        keys: &[ObjectId],
    ) -> Result<HashMap<ObjectId, EventDoc>, StoreError> {
        let events = self.store.events_by_ids(keys).await?;
        Ok(events.into_iter().map(|event| (event.id, event)).collect())
    }
}

/// One loader set per incoming request; dropped with it, so nothing is
/// cached across unrelated requests.
pub struct Loaders {
    pub users: DataLoader<ObjectId, UserDoc, UserBatch>,
    pub events: DataLoader<ObjectId, EventDoc, EventBatch>,
}

impl Loaders {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            users: DataLoader::new(UserBatch {
                store: store.clone(),
            }),
            events: DataLoader::new(EventBatch { store }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use super::*;

    /// Knows `value-<key>` for the keys it is given; records every batch.
    struct RecordingLoader {
        known: Vec<String>,
        calls: AtomicUsize,
        batches: StdMutex<Vec<Vec<String>>>,
    }

    impl RecordingLoader {
        fn new(known: &[&str]) -> Self {
            Self {
                known: known.iter().map(|k| k.to_string()).collect(),
                calls: AtomicUsize::new(0),
                batches: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BatchLoader<String, String> for RecordingLoader {
        async fn load_batch(
            &self,
            keys: &[String],
        ) -> Result<HashMap<String, String>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(keys.to_vec());
            Ok(keys
                .iter()
                .filter(|k| self.known.contains(*k))
                .map(|k| (k.clone(), format!("value-{}", k)))
                .collect())
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl BatchLoader<String, String> for FailingLoader {
        async fn load_batch(
            &self,
            _keys: &[String],
        ) -> Result<HashMap<String, String>, StoreError> {
            Err(StoreError::Database(mongodb::error::Error::custom(
                "store down",
            )))
        }
    }

    #[tokio::test]
    async fn test_single_load() {
        let loader = DataLoader::new(RecordingLoader::new(&["key1"]));
        let value = loader.load("key1".to_string()).await.unwrap();
        assert_eq!(value, Some("value-key1".to_string()));
    }

    #[tokio::test]
    async fn test_missing_key_resolves_to_none() {
        let loader = DataLoader::new(RecordingLoader::new(&["key1"]));
        let value = loader.load("unknown".to_string()).await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_repeat_load_hits_cache() {
        let loader = DataLoader::new(RecordingLoader::new(&["key1"]));

        let first = loader.load("key1".to_string()).await.unwrap();
        let second = loader.load("key1".to_string()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(loader.loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_coalesce_into_one_batch() {
        let loader = DataLoader::new(RecordingLoader::new(&["a", "b", "c"]));

        let (a, b, dup, c) = tokio::join!(
            loader.load("a".to_string()),
            loader.load("b".to_string()),
            loader.load("a".to_string()),
            loader.load("c".to_string()),
        );

        assert_eq!(a.unwrap(), Some("value-a".to_string()));
        assert_eq!(b.unwrap(), Some("value-b".to_string()));
        assert_eq!(dup.unwrap(), Some("value-a".to_string()));
        assert_eq!(c.unwrap(), Some("value-c".to_string()));

        assert_eq!(loader.loader.calls.load(Ordering::SeqCst), 1);
        let batches = loader.loader.batches.lock().unwrap();
        // duplicate "a" joins the in-flight fetch, it is not re-queued
        assert_eq!(batches[0], vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_load_many_preserves_request_order() {
        let loader = DataLoader::new(RecordingLoader::new(&["a", "b", "c"]));

        let values = loader
            .load_many(vec!["c".to_string(), "a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(values, vec!["value-c", "value-a", "value-b"]);
        assert_eq!(loader.loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_many_skips_absent_keys() {
        let loader = DataLoader::new(RecordingLoader::new(&["a", "c"]));

        let values = loader
            .load_many(vec!["a".to_string(), "gone".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert_eq!(values, vec!["value-a", "value-c"]);
    }

    #[tokio::test]
    async fn test_sequential_loads_issue_separate_batches() {
        let loader = DataLoader::new(RecordingLoader::new(&["a", "b"]));

        loader.load("a".to_string()).await.unwrap();
        loader.load("b".to_string()).await.unwrap();

        assert_eq!(loader.loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_is_shared_by_all_callers() {
        let loader = DataLoader::new(FailingLoader);

        let (a, b) = tokio::join!(
            loader.load("a".to_string()),
            loader.load("b".to_string()),
        );

        assert!(matches!(a, Err(LoadError::Store(_))));
        assert!(matches!(b, Err(LoadError::Store(_))));
    }
}
