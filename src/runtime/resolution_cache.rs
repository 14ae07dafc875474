// src/runtime/resolution_cache.rs
//! Single-flight resolution cache for modules and services
//!
//! `get_or_compute` guarantees that concurrent callers asking for the same
//! missing key share one computation. The first caller registers a shared
//! setup future; later callers await a clone of it and all of them observe
//! the same value or the same error.
//!
//! ```text
//! get_or_compute("Billing")
//!   ├─ resident?      → hit, return value
//!   ├─ in flight?     → await shared setup
//!   └─ otherwise      → register setup, await it
//!                          └─ on completion: cache Ok, drop Err, clear in-flight
//! ```
//!
//! Failures are never cached, so the next `get_or_compute` retries. A setup
//! that was invalidated while running still completes for its waiters but
//! its value is discarded.

use crate::runtime::bounded_store::BoundedStore;
use crate::utils::errors::{Result, ScriptError};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

tokio::task_local! {
    /// Keys being resolved on the current setup chain
    static RESOLUTION_CHAIN: Vec<(&'static str, String)>;
}

type SharedSetup<V> = Shared<BoxFuture<'static, Result<V>>>;

struct InFlight<V> {
    id: u64,
    setup: SharedSetup<V>,
}

struct CacheState<V> {
    store: BoundedStore<V>,
    in_flight: HashMap<String, InFlight<V>>,
    next_id: u64,
}

struct CacheInner<V> {
    kind: &'static str,
    state: Mutex<CacheState<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> CacheInner<V> {
    fn complete(&self, key: &str, id: u64, result: &Result<V>) {
        let mut state = self.state.lock();
        let current = state.in_flight.get(key).map(|f| f.id) == Some(id);
        if !current {
            trace!("Discarding stale {} setup for {}", self.kind, key);
            return;
        }
        state.in_flight.remove(key);

        match result {
            Ok(value) => {
                let evicted = state.store.insert(key, value.clone());
                if evicted > 0 {
                    self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                    metrics::counter!("scripthost_cache_evictions_total", "cache" => self.kind)
                        .increment(evicted as u64);
                }
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Memoizing, capacity-bounded cache with compute-if-absent semantics
pub struct ResolutionCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for ResolutionCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> ResolutionCache<V> {
    /// Create a cache labelled `kind` ("module", "service") holding at most `capacity` entries
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                kind,
                state: Mutex::new(CacheState {
                    store: BoundedStore::new(capacity),
                    in_flight: HashMap::new(),
                    next_id: 0,
                }),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                computations: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    /// Non-blocking lookup; a miss has no side effect
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.state.lock().store.get(key)
    }

    /// Return the cached value for `key`, computing it once on a miss
    ///
    /// `compute` is invoked on the first poll of the shared setup, after the
    /// cache lock is released, so it may call back into this cache.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if on_resolution_chain(self.inner.kind, key) {
            return Err(ScriptError::CircularResolution {
                kind: self.inner.kind,
                name: key.to_string(),
            });
        }

        let setup = {
            let mut state = self.inner.state.lock();

            if let Some(value) = state.store.get(key) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("scripthost_cache_hits_total", "cache" => self.inner.kind)
                    .increment(1);
                return Ok(value);
            }

            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("scripthost_cache_misses_total", "cache" => self.inner.kind)
                .increment(1);

            match state.in_flight.get(key) {
                Some(flight) => {
                    trace!("Joining in-flight {} setup for {}", self.inner.kind, key);
                    flight.setup.clone()
                }
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    self.inner.computations.fetch_add(1, Ordering::Relaxed);
                    debug!("Starting {} setup for {}", self.inner.kind, key);

                    let inner = Arc::clone(&self.inner);
                    let owned_key = key.to_string();
                    let chain = extend_chain(self.inner.kind, key);
                    let computation =
                        RESOLUTION_CHAIN.scope(chain, async move { compute().await });

                    let setup = async move {
                        let result = computation.await;
                        inner.complete(&owned_key, id, &result);
                        result
                    }
                    .boxed()
                    .shared();

                    state.in_flight.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            setup: setup.clone(),
                        },
                    );
                    setup
                }
            }
        };

        setup.await
    }

    /// Store `value` under `key`; `None` deletes
    pub fn put(&self, key: &str, value: Option<V>) {
        let Some(value) = value else {
            self.invalidate(key);
            return;
        };

        let mut state = self.inner.state.lock();
        state.in_flight.remove(key);
        let evicted = state.store.insert(key, value);
        if evicted > 0 {
            self.inner.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Drop `key`, including any setup still running for it
    ///
    /// A running setup with no remaining waiters is dropped here, outside
    /// the cache lock.
    pub fn invalidate(&self, key: &str) {
        let abandoned = {
            let mut state = self.inner.state.lock();
            state.store.remove(key);
            state.in_flight.remove(key)
        };
        drop(abandoned);
    }

    pub fn invalidate_all(&self) {
        let abandoned: Vec<InFlight<V>> = {
            let mut state = self.inner.state.lock();
            state.store.clear();
            state.in_flight.drain().map(|(_, flight)| flight).collect()
        };
        debug!(
            "Invalidated all {} entries ({} running setups)",
            self.inner.kind,
            abandoned.len()
        );
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().store.capacity()
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, in_flight, capacity) = {
            let state = self.inner.state.lock();
            (state.store.len(), state.in_flight.len(), state.store.capacity())
        };
        CacheStats {
            kind: self.inner.kind,
            entries,
            in_flight,
            capacity,
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            computations: self.inner.computations.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }
}

fn on_resolution_chain(kind: &'static str, key: &str) -> bool {
    RESOLUTION_CHAIN
        .try_with(|chain| chain.iter().any(|(k, name)| *k == kind && name == key))
        .unwrap_or(false)
}

fn extend_chain(kind: &'static str, key: &str) -> Vec<(&'static str, String)> {
    let mut chain = RESOLUTION_CHAIN
        .try_with(|chain| chain.clone())
        .unwrap_or_default();
    chain.push((kind, key.to_string()));
    chain
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub kind: &'static str,
    pub entries: usize,
    pub in_flight: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub failures: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit percentage over all lookups through `get_or_compute`
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            (self.hits as f64 / lookups as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_miss_has_no_side_effect() {
        let cache: ResolutionCache<u32> = ResolutionCache::new("module", 8);
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().computations, 0);
    }

    #[tokio::test]
    async fn test_compute_once_then_hit() {
        let cache: ResolutionCache<u32> = ResolutionCache::new("module", 8);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_compute("a", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("a"), Some(7));
        assert_eq!(cache.stats().hits, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_concurrent_callers() {
        let cache: ResolutionCache<Arc<String>> = ResolutionCache::new("service", 8);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..16 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("Billing", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Arc::new("billing".to_string()))
                    })
                    .await
            }));
        }

        let mut results = vec![];
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_shared_and_not_cached() {
        let cache: ResolutionCache<u32> = ResolutionCache::new("module", 8);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..4 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("broken", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(ScriptError::ResolutionFailed {
                            kind: "module",
                            name: "broken".into(),
                            reason: "no value".into(),
                        })
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, ScriptError::ResolutionFailed { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("broken"), None);

        // next call recomputes
        let value = cache.get_or_compute("broken", || async { Ok(1) }).await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_invalidate_then_recompute() {
        let cache: ResolutionCache<u32> = ResolutionCache::new("module", 8);
        cache.get_or_compute("a", || async { Ok(1) }).await.unwrap();

        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);

        let value = cache.get_or_compute("a", || async { Ok(2) }).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_put_none_deletes() {
        let cache: ResolutionCache<u32> = ResolutionCache::new("module", 8);
        cache.put("a", Some(1));
        assert_eq!(cache.get("a"), Some(1));
        cache.put("a", None);
        assert_eq!(cache.get("a"), None);
    }

    #[tokio::test]
    async fn test_invalidate_all_discards_running_setup() {
        let cache: ResolutionCache<u32> = ResolutionCache::new("module", 8);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let running = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow", move || async move {
                        let _ = rx.await;
                        Ok(5)
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.stats().in_flight, 1);
        cache.invalidate_all();
        tx.send(()).unwrap();

        // waiter still gets its value, but it is not cached
        assert_eq!(running.await.unwrap().unwrap(), 5);
        assert_eq!(cache.get("slow"), None);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let cache: ResolutionCache<usize> = ResolutionCache::new("module", 4);
        for i in 0..10 {
            let key = format!("m{}", i);
            cache.get_or_compute(&key, move || async move { Ok(i) }).await.unwrap();
            assert!(cache.len() <= 4);
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.stats().evictions, 6);
    }

    #[tokio::test]
    async fn test_circular_resolution_detected() {
        let cache: ResolutionCache<u32> = ResolutionCache::new("module", 8);
        let inner = cache.clone();

        let err = cache
            .get_or_compute("loop", move || async move {
                inner.get_or_compute("loop", || async { Ok(1) }).await
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptError::CircularResolution { .. }));
        assert_eq!(cache.get("loop"), None);
    }

    #[tokio::test]
    async fn test_compute_may_touch_cache_synchronously() {
        let cache: ResolutionCache<u32> = ResolutionCache::new("module", 8);
        cache.put("seed", Some(3));
        let inner = cache.clone();

        let value = cache
            .get_or_compute("derived", move || {
                let seed = inner.get("seed").unwrap_or(0);
                inner.invalidate("stale");
                async move { Ok(seed * 2) }
            })
            .await
            .unwrap();

        assert_eq!(value, 6);
        assert_eq!(cache.get("derived"), Some(6));
    }

    #[tokio::test]
    async fn test_nested_resolution_of_other_key() {
        let cache: ResolutionCache<u32> = ResolutionCache::new("module", 8);
        let inner = cache.clone();

        let value = cache
            .get_or_compute("outer", move || async move {
                let dep = inner.get_or_compute("dep", || async { Ok(20) }).await?;
                Ok(dep + 1)
            })
            .await
            .unwrap();

        assert_eq!(value, 21);
        assert_eq!(cache.get("dep"), Some(20));
    }
}
