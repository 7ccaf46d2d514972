//! Cache Store Module
//!
//! The cache façade: a hash index and an expiry heap kept in step under one
//! reader/writer lock.
//!
//! # Expire-on-write
//! Entries are never removed by a timer and never checked on read. A lookup
//! returns whatever the index holds, even if its TTL has already elapsed.
//! Expired entries are dropped only by [`Cache::flush`], by [`Cache::expire`],
//! or by the flush every [`Cache::set`] of a new key performs before inserting.
//! Reads stay cheap and the cleanup cost lands on writers.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::cache::bucket::{Bucket, Buckets, Handle};
use crate::cache::clock::{expiry_after, Clock, SystemClock};
use crate::cache::heap::ExpiryHeap;
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::config::Config;
use crate::error::Result;

/// Callback run with the key and value of every entry removed from the cache.
pub type ExpireCallback<K, V> = Box<dyn Fn(K, V) + Send + Sync>;

// == Locked State ==
/// Index and heap, only ever touched together under the cache lock.
struct Inner<K, V> {
    index: HashMap<K, Handle>,
    buckets: Buckets<K, V>,
    heap: ExpiryHeap,
}

impl<K: Hash + Eq, V> Inner<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            buckets: Buckets::with_capacity(capacity),
            heap: ExpiryHeap::with_capacity(capacity),
        }
    }

    /// Removes every entry whose expiry is at or before `now`.
    fn flush(&mut self, now: Instant, on_expire: Option<&ExpireCallback<K, V>>) -> usize {
        let mut removed = 0;
        while let Some(handle) = self.heap.peek() {
            if !self.buckets.get(handle).is_expired(now) {
                break;
            }
            self.delete(handle, on_expire);
            removed += 1;
        }
        removed
    }

    /// Drops a bucket from the index and the heap, then reports it.
    ///
    /// Bookkeeping completes before the callback runs, so a panicking callback
    /// leaves both structures consistent.
    fn delete(&mut self, handle: Handle, on_expire: Option<&ExpireCallback<K, V>>) {
        let position = self.buckets.get(handle).position;
        let removed = self.heap.remove(position, &mut self.buckets);
        debug_assert_eq!(removed, handle, "heap position pointed at another bucket");

        let bucket = self.buckets.remove(handle);
        let indexed = self.index.remove(&bucket.key);
        debug_assert_eq!(indexed, Some(handle), "index and heap disagree");

        if let Some(on_expire) = on_expire {
            on_expire(bucket.key, bucket.value);
        }
    }
}

// == Cache ==
/// In-memory key/value cache with a TTL on every entry.
///
/// See the [module documentation](self) for when expired entries go away.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use ttlcache::Cache;
///
/// let cache = Cache::new();
/// cache.set("session", 42, Duration::from_secs(60));
/// assert_eq!(cache.get("session"), Some(42));
///
/// cache.expire("session");
/// assert_eq!(cache.get("session"), None);
/// ```
pub struct Cache<K, V> {
    /// Label attached to log events
    name: String,
    /// Index and heap
    inner: RwLock<Inner<K, V>>,
    /// Called on every removal, fixed at construction
    on_expire: Option<ExpireCallback<K, V>>,
    /// Time source for stamping and flushing
    clock: Box<dyn Clock>,
    /// Operation counters
    stats: StatsRecorder,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone,
{
    // == Constructor ==
    /// Creates an empty cache with no expiration callback.
    pub fn new() -> Self {
        CacheBuilder::new().build()
    }

    /// Starts building a cache with a callback, clock, or capacity.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    // == Set ==
    /// Stores `value` under `key`, expiring `ttl` from now.
    ///
    /// An existing entry is updated in place and repositioned in the expiry
    /// order. A new key first flushes every expired entry, which may run the
    /// expiration callback for unrelated keys.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut guard = self.write();
        let inner = &mut *guard;
        let now = self.clock.now();
        let expiry = expiry_after(now, ttl);

        if let Some(&handle) = inner.index.get(&key) {
            let bucket = inner.buckets.get_mut(handle);
            bucket.value = value;
            bucket.expiry = expiry;
            let position = bucket.position;
            inner.heap.fix(position, &mut inner.buckets);

            self.stats.record_update();
            trace!(cache = %self.name, position, "updated entry");
            return;
        }

        let flushed = inner.flush(now, self.on_expire.as_ref());
        self.record_flush(flushed);

        let position = inner.heap.len();
        let handle = inner
            .buckets
            .insert(Bucket::new(key.clone(), value, expiry, position));
        inner.heap.push(handle, &mut inner.buckets);
        inner.index.insert(key, handle);

        self.stats.record_insert();
        trace!(cache = %self.name, entries = inner.index.len(), "inserted entry");
    }

    // == Get ==
    /// Returns a clone of the value stored under `key`.
    ///
    /// Expiry is not checked: an entry whose TTL has elapsed is still returned
    /// until a write flushes it.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get_with(key, V::clone)
    }

    /// Runs `f` on the value stored under `key` while holding the read lock.
    ///
    /// Same lookup semantics as [`get`](Self::get), for values that are not
    /// `Clone` or only need to be inspected.
    pub fn get_with<Q, R, F>(&self, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> R,
    {
        let inner = self.read();
        let result = inner
            .index
            .get(key)
            .map(|&handle| f(&inner.buckets.get(handle).value));
        self.stats.record_lookup(result.is_some());
        result
    }

    /// Whether `key` is in the index. Expiry is not checked.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().index.contains_key(key)
    }

    // == Expire ==
    /// Removes `key` now, running the expiration callback. Missing keys are
    /// ignored.
    pub fn expire<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.write();
        if let Some(&handle) = inner.index.get(key) {
            inner.delete(handle, self.on_expire.as_ref());
            self.stats.record_removal();
            trace!(cache = %self.name, entries = inner.index.len(), "expired entry");
        }
    }

    // == Flush ==
    /// Removes every entry whose expiry is at or before now.
    ///
    /// Returns the number of entries removed.
    pub fn flush(&self) -> usize {
        let mut inner = self.write();
        let flushed = inner.flush(self.clock.now(), self.on_expire.as_ref());
        self.record_flush(flushed);
        flushed
    }

    /// Expiry of the entry that will be flushed next, if any.
    pub fn next_expiry(&self) -> Option<Instant> {
        let inner = self.read();
        inner
            .heap
            .peek()
            .map(|handle| inner.buckets.get(handle).expiry)
    }

    // == Length ==
    /// Returns the number of entries, including expired ones not yet flushed.
    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    /// Name given to this cache in its configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    // == Internals ==
    fn record_flush(&self, flushed: usize) {
        if flushed > 0 {
            self.stats.record_expirations(flushed);
            debug!(cache = %self.name, flushed, "flushed expired entries");
        }
    }

    // A panic can only poison the lock from inside the expiration callback,
    // which runs after bookkeeping is complete.
    fn read(&self) -> RwLockReadGuard<'_, Inner<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Asserts that the index and heap describe the same set of buckets.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let inner = self.read();
        assert_eq!(inner.index.len(), inner.heap.len(), "index and heap sizes differ");
        assert_eq!(inner.index.len(), inner.buckets.len(), "leaked buckets");
        for (key, &handle) in &inner.index {
            let bucket = inner.buckets.get(handle);
            assert!(bucket.key == *key, "bucket stored under the wrong key");
            assert_eq!(inner.heap.handle_at(bucket.position), handle);
        }
        inner.heap.assert_consistent(&inner.buckets);
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .len();
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("entries", &entries)
            .field("on_expire", &self.on_expire.is_some())
            .finish()
    }
}

// == Cache Builder ==
/// Configures a [`Cache`] before it is created.
///
/// The expiration callback can only be set here, so it cannot change while
/// the cache is in use.
pub struct CacheBuilder<K, V> {
    config: Config,
    on_expire: Option<ExpireCallback<K, V>>,
    clock: Box<dyn Clock>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone,
{
    // == Constructor ==
    /// Creates a builder with the default configuration, the system clock
    /// and no expiration callback.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            on_expire: None,
            clock: Box::new(SystemClock),
        }
    }

    /// Starts from a configuration, rejecting it if invalid.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    // == Setters ==
    /// Sets the name attached to log events.
    ///
    /// A blank name is replaced by the default name when the cache is built.
    ///
    /// # Arguments
    /// * `name` - Label for this cache
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets how many entries to preallocate room for.
    ///
    /// Values above [`MAX_INITIAL_CAPACITY`](crate::config::MAX_INITIAL_CAPACITY)
    /// are clamped when the cache is built.
    ///
    /// # Arguments
    /// * `capacity` - Number of entries to preallocate
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_capacity = capacity;
        self
    }

    /// Sets the callback run with every removed key and value.
    ///
    /// It runs on the caller's thread while the cache's write lock is held:
    /// it must not call back into the same cache, and it blocks every other
    /// operation until it returns.
    pub fn on_expire<F>(mut self, callback: F) -> Self
    where
        F: Fn(K, V) + Send + Sync + 'static,
    {
        self.on_expire = Some(Box::new(callback));
        self
    }

    /// Replaces the system clock, mainly for tests.
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    // == Build ==
    /// Creates the cache.
    ///
    /// Settings made through the setters are normalized first, so building
    /// never fails.
    pub fn build(self) -> Cache<K, V> {
        let config = self.config.normalized();
        debug!(
            cache = %config.name,
            initial_capacity = config.initial_capacity,
            "cache created"
        );
        Cache {
            inner: RwLock::new(Inner::with_capacity(config.initial_capacity)),
            name: config.name,
            on_expire: self.on_expire,
            clock: self.clock,
            stats: StatsRecorder::default(),
        }
    }
}

impl<K, V> Default for CacheBuilder<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
