//! Bounded cache of analysis contexts.
//!
//! Contexts are expensive to build (open the image, find the page tables,
//! guess a profile), so they are kept per target and reused across
//! requests. The cache guarantees:
//! - at most one live context per key: concurrent misses on the same key
//!   construct once and every caller gets the same instance (single-flight),
//! - bounded size via least-recently-used eviction of ready entries that
//!   no run is holding; the cache runs over capacity until they are released,
//! - failed constructions leave nothing behind, so the next call retries.
//!
//! The cache-wide lock is only held for bookkeeping, never while a context
//! is being built or used.

use super::{AnalysisContext, ContextError};
use crate::models::AttributeValue;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Default number of contexts kept alive.
pub const DEFAULT_CAPACITY: usize = 10;

/// A cached context, shared between the cache and in-flight runs.
pub type SharedContext = Arc<Mutex<AnalysisContext>>;

struct LoadWaiter {
    state: Arc<(Mutex<LoadState>, Condvar)>,
}

struct LoadState {
    done: bool,
    context: Option<SharedContext>,
    error: Option<ContextError>,
}

impl Clone for LoadWaiter {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl LoadWaiter {
    fn new() -> Self {
        Self {
            state: Arc::new((
                Mutex::new(LoadState {
                    done: false,
                    context: None,
                    error: None,
                }),
                Condvar::new(),
            )),
        }
    }

    fn set_ok(&self, context: SharedContext) {
        let (lock, cv) = &*self.state;
        {
            let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            guard.done = true;
            guard.context = Some(context);
            guard.error = None;
        }
        cv.notify_all();
    }

    fn set_err(&self, error: ContextError) {
        let (lock, cv) = &*self.state;
        {
            let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            guard.done = true;
            guard.context = None;
            guard.error = Some(error);
        }
        cv.notify_all();
    }

    fn wait(&self, key: &str) -> Result<SharedContext, ContextError> {
        let (lock, cv) = &*self.state;
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !guard.done {
            guard = cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
        if let Some(context) = &guard.context {
            return Ok(context.clone());
        }
        Err(guard.error.clone().unwrap_or_else(|| ContextError::Construction {
            target: key.to_string(),
            reason: "unknown construction error".to_string(),
        }))
    }
}

enum Entry {
    Ready(SharedContext),
    Loading(LoadWaiter),
}

struct CacheState {
    capacity: usize,
    entries: HashMap<String, Entry>,
    /// Most recently used at the front.
    lru: VecDeque<String>,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_front(key.to_string());
    }

    fn forget(&mut self, key: &str) {
        self.entries.remove(key);
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
    }

    fn begin_load(&mut self, key: &str) -> LoadWaiter {
        let waiter = LoadWaiter::new();
        self.entries
            .insert(key.to_string(), Entry::Loading(waiter.clone()));
        waiter
    }

    fn finish_ok(&mut self, key: &str, context: SharedContext) {
        self.entries.insert(key.to_string(), Entry::Ready(context));
        self.touch(key);
    }

    fn evict_if_needed(&mut self) -> usize {
        let mut evicted = 0;
        let mut skipped = Vec::new();
        while self.ready_len() > self.capacity {
            let Some(victim) = self.lru.pop_back() else {
                break;
            };
            match self.entries.get(&victim) {
                // A context still held by a run stays cached until released,
                // so a key never has two live contexts.
                Some(Entry::Ready(context)) if Arc::strong_count(context) > 1 => {
                    skipped.push(victim)
                }
                Some(Entry::Ready(_)) => {
                    self.entries.remove(&victim);
                    debug!("Evicted analysis context for {}", victim);
                    evicted += 1;
                }
                // In-flight loads are never evicted.
                Some(Entry::Loading(_)) => skipped.push(victim),
                None => {}
            }
        }
        if !skipped.is_empty() && self.ready_len() > self.capacity {
            debug!(
                "{} analysis context(s) in use, cache over capacity until released",
                skipped.len()
            );
        }
        while let Some(key) = skipped.pop() {
            self.lru.push_back(key);
        }
        evicted
    }

    fn ready_len(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::Ready(_)))
            .count()
    }
}

/// Settles an in-flight load even if the factory unwinds.
struct PendingLoad<'a> {
    cache: &'a ContextCache,
    key: &'a str,
    waiter: LoadWaiter,
    settled: bool,
}

impl PendingLoad<'_> {
    fn succeed(mut self, context: SharedContext) {
        {
            let mut state = self.cache.state();
            state.finish_ok(self.key, context.clone());
            state.evict_if_needed();
        }
        self.waiter.set_ok(context);
        self.settled = true;
    }

    fn fail(mut self, error: ContextError) {
        self.cache.state().forget(self.key);
        self.waiter.set_err(error);
        self.settled = true;
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.cache.state().forget(self.key);
        self.waiter.set_err(ContextError::Construction {
            target: self.key.to_string(),
            reason: "context construction panicked".to_string(),
        });
    }
}

/// Process-wide store of analysis contexts keyed by target path.
pub struct ContextCache {
    state: Mutex<CacheState>,
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ContextCache {
    /// Create a cache holding at most `capacity` contexts (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                capacity: capacity.max(1),
                entries: HashMap::new(),
                lru: VecDeque::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.state().capacity
    }

    /// Number of ready contexts.
    pub fn len(&self) -> usize {
        self.state().ready_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a ready context exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        matches!(self.state().entries.get(key), Some(Entry::Ready(_)))
    }

    /// Return the context for `key`, building it with `factory` on a miss.
    ///
    /// Concurrent callers for the same key wait for the first caller's
    /// construction and share its result, error included.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> Result<SharedContext, ContextError>
    where
        F: FnOnce() -> Result<AnalysisContext, ContextError>,
    {
        enum Lookup {
            Wait(LoadWaiter),
            Load(LoadWaiter),
        }

        let lookup = {
            let mut state = self.state();
            match state.entries.get(key) {
                Some(Entry::Ready(context)) => {
                    let context = context.clone();
                    state.touch(key);
                    debug!("Analysis context cache hit for {}", key);
                    return Ok(context);
                }
                Some(Entry::Loading(waiter)) => Lookup::Wait(waiter.clone()),
                None => Lookup::Load(state.begin_load(key)),
            }
        };

        match lookup {
            Lookup::Wait(waiter) => {
                debug!("Waiting for in-flight context construction for {}", key);
                waiter.wait(key)
            }
            Lookup::Load(waiter) => {
                debug!("Analysis context cache miss for {}", key);
                let pending = PendingLoad {
                    cache: self,
                    key,
                    waiter,
                    settled: false,
                };
                match factory() {
                    Ok(context) => {
                        let context = Arc::new(Mutex::new(context));
                        pending.succeed(context.clone());
                        Ok(context)
                    }
                    Err(err) => {
                        pending.fail(err.clone());
                        Err(err)
                    }
                }
            }
        }
    }

    /// Set an attribute on the cached context for `key`.
    pub fn set_attribute(
        &self,
        key: &str,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), ContextError> {
        let context = {
            let mut state = self.state();
            let context = match state.entries.get(key) {
                Some(Entry::Ready(context)) => context.clone(),
                _ => return Err(ContextError::NotCached(key.to_string())),
            };
            state.touch(key);
            context
        };

        context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_attribute(name, value);
        Ok(())
    }

    /// Evict least-recently-used contexts until the capacity is respected.
    /// Contexts still held by a run are skipped. Returns the number of
    /// evicted contexts.
    pub fn evict_if_over_capacity(&self) -> usize {
        self.state().evict_if_needed()
    }

    /// Change the capacity, evicting as needed.
    pub fn set_capacity(&self, capacity: usize) -> usize {
        let mut state = self.state();
        state.capacity = capacity.max(1);
        state.evict_if_needed()
    }

    /// Drop the context for `key` so the next request rebuilds it.
    /// Returns false when there is no ready context or it is still in use.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state();
        match state.entries.get(key) {
            Some(Entry::Ready(context)) if Arc::strong_count(context) == 1 => {
                state.forget(key);
                true
            }
            _ => false,
        }
    }
}
