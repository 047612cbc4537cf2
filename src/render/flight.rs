//! Single-flight memo map with TTL and LRU bounds
//!
//! Backs both the render cache and the source memo. Entries live in an
//! LRU map; computations that are still running live in a job table.
//! Both tables sit behind one `parking_lot::Mutex` so "check entry",
//! "check job" and "register job" happen as one atomic step.
//!
//! Each job runs on its own Tokio task and is shared with every waiter
//! through a `futures::future::Shared` wrapper around its `JoinHandle`.
//! Waiters that go away do not cancel the job; the result still lands in
//! the map for the next caller. Failures are handed to all current
//! waiters and never stored.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

use super::error::{RenderError, RenderResult};
use super::types::CacheStats;

/// Upper bound for deadlines so huge TTLs cannot overflow `Instant`
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Called with every entry that leaves the map through expiry, LRU
/// pressure or explicit removal. Overwriting a key does not call it.
pub type EvictHook<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

type SharedOutcome<V> = Shared<BoxFuture<'static, RenderResult<Memo<V>>>>;

/// A memoized value with its validity window
#[derive(Debug, Clone)]
pub struct Memo<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    deadline: Instant,
}

impl<V> Memo<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let ttl = ttl.min(MAX_TTL);
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            value,
            created_at,
            expires_at,
            deadline: Instant::now() + ttl,
        }
    }

    /// Valid strictly before its deadline
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.deadline
    }
}

struct Job<V> {
    id: u64,
    outcome: SharedOutcome<V>,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    coalesced: u64,
    failures: u64,
    evictions: u64,
}

struct FlightState<K, V> {
    entries: LruCache<K, Memo<V>>,
    jobs: HashMap<K, Job<V>>,
    next_job: u64,
    counters: Counters,
    /// Entries evicted under the lock, reported once it is released
    evicted: Vec<(K, V)>,
}

struct Inner<K, V> {
    state: Mutex<FlightState<K, V>>,
    on_evict: Option<EvictHook<K, V>>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn evict(&self, state: &mut FlightState<K, V>, key: K, value: V) {
        state.counters.evictions += 1;
        if self.on_evict.is_some() {
            state.evicted.push((key, value));
        }
    }

    fn report(&self, evicted: Vec<(K, V)>) {
        if let Some(hook) = &self.on_evict {
            for (key, value) in &evicted {
                hook(key, value);
            }
        }
    }

    /// Unlock, then run the evict hook for everything evicted meanwhile
    fn release(&self, mut state: MutexGuard<'_, FlightState<K, V>>) {
        let evicted = std::mem::take(&mut state.evicted);
        drop(state);
        self.report(evicted);
    }

    /// Returns the live entry for `key`, evicting it first if it expired
    fn take_live(&self, state: &mut FlightState<K, V>, key: &K, now: Instant) -> Option<Memo<V>> {
        match state.entries.get(key) {
            Some(memo) if memo.is_live(now) => return Some(memo.clone()),
            Some(_) => {}
            None => return None,
        }

        if let Some(expired) = state.entries.pop(key) {
            self.evict(state, key.clone(), expired.value);
        }
        None
    }

    fn insert(&self, state: &mut FlightState<K, V>, key: K, memo: Memo<V>) {
        let probe = key.clone();
        if let Some((old_key, old)) = state.entries.push(key, memo) {
            if old_key != probe {
                self.evict(state, old_key, old.value);
            }
        }
    }
}

/// Thread-safe single-flight memo map
pub struct FlightMap<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for FlightMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> FlightMap<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a map holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Create a map that reports every evicted entry to `on_evict`
    ///
    /// The hook runs after the map's lock has been released.
    pub fn with_evict_hook(capacity: usize, on_evict: EvictHook<K, V>) -> Self {
        Self::build(capacity, Some(on_evict))
    }

    fn build(capacity: usize, on_evict: Option<EvictHook<K, V>>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(FlightState {
                    entries: LruCache::new(capacity),
                    jobs: HashMap::new(),
                    next_job: 0,
                    counters: Counters::default(),
                    evicted: Vec::new(),
                }),
                on_evict,
            }),
        }
    }

    /// Live entry for `key`, if any
    pub fn get(&self, key: &K) -> Option<Memo<V>> {
        let mut state = self.inner.state.lock();
        let hit = self.inner.take_live(&mut state, key, Instant::now());
        if hit.is_some() {
            state.counters.hits += 1;
        } else {
            state.counters.misses += 1;
        }
        self.inner.release(state);
        hit
    }

    /// Store `value` under `key`, replacing any previous entry
    pub fn put(&self, key: K, value: V, ttl: Duration) -> Memo<V> {
        let memo = Memo::new(value, ttl);
        let mut state = self.inner.state.lock();
        self.inner.insert(&mut state, key, memo.clone());
        self.inner.release(state);
        memo
    }

    /// Return the live entry, join the running job, or start a new one
    ///
    /// `compute` runs at most once per key at any instant. Its result is
    /// stored with `ttl` and shared with every concurrent caller; an error
    /// is shared the same way but leaves the key absent.
    pub async fn get_or_compute<F, Fut>(&self, key: K, ttl: Duration, compute: F) -> RenderResult<Memo<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RenderResult<V>> + Send + 'static,
    {
        let outcome = {
            let mut state = self.inner.state.lock();

            let hit = self.inner.take_live(&mut state, &key, Instant::now());
            if let Some(memo) = hit {
                state.counters.hits += 1;
                self.inner.release(state);
                return Ok(memo);
            }

            let running = state.jobs.get(&key).map(|job| job.outcome.clone());
            match running {
                Some(outcome) => {
                    state.counters.coalesced += 1;
                    self.inner.release(state);
                    outcome
                }
                None => {
                    state.counters.misses += 1;
                    let id = state.next_job;
                    state.next_job += 1;

                    // Reported by the new job before it computes.
                    let stale = std::mem::take(&mut state.evicted);
                    let outcome = self.spawn_job(id, key.clone(), ttl, stale, compute);
                    state.jobs.insert(
                        key,
                        Job {
                            id,
                            outcome: outcome.clone(),
                        },
                    );
                    drop(state);
                    outcome
                }
            }
        };

        outcome.await
    }

    fn spawn_job<F, Fut>(
        &self,
        id: u64,
        key: K,
        ttl: Duration,
        stale: Vec<(K, V)>,
        compute: F,
    ) -> SharedOutcome<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RenderResult<V>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            inner.report(stale);

            let result = match AssertUnwindSafe(compute()).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(RenderError::Conversion(format!(
                    "computation for {:?} panicked",
                    key
                ))),
            };

            let mut state = inner.state.lock();
            let registered = state.jobs.get(&key).is_some_and(|job| job.id == id);
            if registered {
                state.jobs.remove(&key);
            }

            let outcome = match result {
                Ok(value) => {
                    let memo = Memo::new(value, ttl);
                    if registered {
                        inner.insert(&mut state, key, memo.clone());
                        Ok(memo)
                    } else {
                        // Invalidated while running: nobody may observe the result.
                        // A newer job or entry for the key owns whatever the value
                        // points at, so only count the eviction in that case.
                        let superseded =
                            state.jobs.contains_key(&key) || state.entries.contains(&key);
                        let err = RenderError::NotFound(format!(
                            "{:?} was invalidated while rendering",
                            key
                        ));
                        if superseded {
                            state.counters.evictions += 1;
                        } else {
                            inner.evict(&mut state, key, memo.value);
                        }
                        Err(err)
                    }
                }
                Err(err) => {
                    state.counters.failures += 1;
                    Err(err)
                }
            };

            inner.release(state);
            outcome
        });

        async move {
            handle
                .await
                .map_err(|e| RenderError::Conversion(format!("Task join error: {}", e)))?
        }
        .boxed()
        .shared()
    }

    /// Drop the entry for `key`; returns whether one was present
    pub fn remove(&self, key: &K) -> bool {
        self.remove_if(key, |_| true)
    }

    /// Drop the entry for `key` only if `matches` accepts it
    pub fn remove_if(&self, key: &K, matches: impl FnOnce(&Memo<V>) -> bool) -> bool {
        let mut state = self.inner.state.lock();
        let accepted = state.entries.peek(key).is_some_and(matches);
        let removed = if accepted { state.entries.pop(key) } else { None };
        let found = removed.is_some();
        if let Some(memo) = removed {
            self.inner.evict(&mut state, key.clone(), memo.value);
        }
        self.inner.release(state);
        found
    }

    /// Drop every entry and detach every running job whose key matches
    ///
    /// Detached jobs still resolve for their waiters but their results
    /// are discarded. Returns the number of entries removed.
    pub fn remove_where(&self, predicate: impl Fn(&K) -> bool) -> usize {
        let mut state = self.inner.state.lock();

        let keys: Vec<K> = state
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            if let Some(memo) = state.entries.pop(key) {
                self.inner.evict(&mut state, key.clone(), memo.value);
            }
        }

        state.jobs.retain(|key, _| !predicate(key));
        self.inner.release(state);
        keys.len()
    }

    /// Evict every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.state.lock();

        let expired: Vec<K> = state
            .entries
            .iter()
            .filter(|(key, memo)| !memo.is_live(now) && !state.jobs.contains_key(*key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(memo) = state.entries.pop(key) {
                self.inner.evict(&mut state, key.clone(), memo.value);
            }
        }

        self.inner.release(state);
        expired.len()
    }

    /// Whether a computation for `key` is currently running
    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, key: &K) -> bool {
        self.inner.state.lock().jobs.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            hits: state.counters.hits,
            misses: state.counters.misses,
            coalesced: state.counters.coalesced,
            failures: state.counters.failures,
            evictions: state.counters.evictions,
            entries: state.entries.len(),
            in_flight: state.jobs.len(),
            capacity: state.entries.cap().get(),
        }
    }
}
