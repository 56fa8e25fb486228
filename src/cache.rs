//! Keyed response cache.
//!
//! Memoizes successful API results under `"{namespace}-{args-json}"` keys.
//! Failures are never stored. Concurrent misses for one key share a single
//! in-flight fetch; late arrivals wait on its outcome. A fetch that was
//! running when the cache was invalidated hands its result to its callers
//! but does not store it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ApiError, ErrorInfo};

type Outcome<V> = Option<Result<V, ErrorInfo>>;

/// Cache key for `namespace` called with `args`.
pub fn cache_key<A: Serialize + ?Sized>(namespace: &str, args: &A) -> Result<String, ApiError> {
    Ok(format!("{}-{}", namespace, serde_json::to_string(args)?))
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

pub struct KeyedCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    in_flight: DashMap<String, watch::Receiver<Outcome<V>>>,
    ttl: Option<Duration>,
    /// Bumped before every invalidation.
    generation: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> Default for KeyedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight marker however the leading fetch ends.
struct InFlightGuard<'a, V> {
    in_flight: &'a DashMap<String, watch::Receiver<Outcome<V>>>,
    key: &'a str,
}

impl<V> Drop for InFlightGuard<'_, V> {
    fn drop(&mut self) {
        self.in_flight.remove(self.key);
    }
}

impl<V: Clone + Send + Sync + 'static> KeyedCache<V> {
    /// Entries live until invalidated.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            ttl: None,
            generation: AtomicU64::new(0),
        }
    }

    /// Entries expire `ttl` after they were stored.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new()
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            if !self.is_expired(&entry) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| self.is_expired(entry));
        None
    }

    fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
        self.ttl.is_some_and(|ttl| entry.stored_at.elapsed() >= ttl)
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Cached value for `key`, or the result of `fetch`.
    ///
    /// Only one fetch per key runs at a time. A successful result is stored
    /// before waiters are released.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V, ErrorInfo>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ApiError>>,
    {
        if let Some(value) = self.get(key) {
            log::debug!("KeyedCache: hit {}", key);
            return Ok(value);
        }

        let (tx, waiting) = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => (None, Some(entry.get().clone())),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                (Some(tx), None)
            }
        };

        if let Some(mut rx) = waiting {
            log::debug!("KeyedCache: joining in-flight fetch for {}", key);
            return match rx.wait_for(|outcome| outcome.is_some()).await {
                Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(ApiError::Cancelled.into())),
                Err(_) => Err(ApiError::Cancelled.into()),
            };
        }

        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            key,
        };

        // A fetch that finished between the miss and taking the slot.
        if let Some(value) = self.get(key) {
            if let Some(tx) = tx {
                let _ = tx.send(Some(Ok(value.clone())));
            }
            return Ok(value);
        }

        log::debug!("KeyedCache: miss {}, fetching", key);
        let generation = self.generation.load(Ordering::Acquire);
        let outcome = match fetch().await {
            Ok(value) => {
                self.insert_if_current(key, value.clone(), generation);
                Ok(value)
            }
            Err(e) => {
                log::warn!("KeyedCache: fetch for {} failed: {}", key, e);
                Err(ErrorInfo::from(&e))
            }
        };

        if let Some(tx) = tx {
            let _ = tx.send(Some(outcome.clone()));
        }
        outcome
    }

    /// Store a fetched value unless an invalidation ran since `generation`.
    ///
    /// The check happens under the entry's shard lock, which every
    /// invalidation also takes after bumping the generation.
    fn insert_if_current(&self, key: &str, value: V, generation: u64) {
        let entry = self.entries.entry(key.to_string());
        if self.generation.load(Ordering::Acquire) != generation {
            log::debug!("KeyedCache: {} invalidated during fetch, not storing", key);
            return;
        }
        entry.insert(CacheEntry {
            value,
            stored_at: Instant::now(),
        });
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.remove(key).is_some()
    }

    /// Drop every entry stored under `namespace`.
    pub fn invalidate_namespace(&self, namespace: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let prefix = format!("{}-", namespace);
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
