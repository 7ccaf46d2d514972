//! Bucket Module
//!
//! Defines the record stored for each live key and the arena that owns them.
//!
//! The index and the expiry heap never hold buckets directly. Both refer to a
//! bucket through a [`Handle`] into [`Buckets`], so each entry has exactly one
//! owner and the heap can move handles around without touching the index.

use std::time::Instant;

// == Handle ==
/// Opaque reference to a bucket slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

// == Bucket ==
/// One live cache entry.
#[derive(Debug)]
pub struct Bucket<K, V> {
    /// Key the entry is indexed under
    pub key: K,
    /// The stored value
    pub value: V,
    /// Absolute instant at or after which the entry may be flushed
    pub expiry: Instant,
    /// Current index of this bucket's handle in the expiry heap
    pub position: usize,
}

impl<K, V> Bucket<K, V> {
    // == Constructor ==
    /// Creates a bucket that will sit at `position` once pushed onto the heap.
    pub fn new(key: K, value: V, expiry: Instant, position: usize) -> Self {
        Self {
            key,
            value,
            expiry,
            position,
        }
    }

    // == Is Expired ==
    /// An entry is expired once `now` has reached its expiry.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expiry <= now
    }
}

// == Bucket Arena ==
/// Slot storage for buckets, reusing freed slots.
#[derive(Debug)]
pub struct Buckets<K, V> {
    slots: Vec<Option<Bucket<K, V>>>,
    vacant: Vec<usize>,
}

impl<K, V> Buckets<K, V> {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    // == Constructor ==
    /// Creates an empty arena with room for `capacity` buckets.
    ///
    /// # Arguments
    /// * `capacity` - Number of slots to preallocate
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            vacant: Vec::new(),
        }
    }

    // == Insert ==
    /// Stores a bucket and returns the handle addressing it.
    pub fn insert(&mut self, bucket: Bucket<K, V>) -> Handle {
        match self.vacant.pop() {
            Some(slot) => {
                debug_assert!(self.slots[slot].is_none(), "vacant slot {slot} is occupied");
                self.slots[slot] = Some(bucket);
                Handle(slot)
            }
            None => {
                self.slots.push(Some(bucket));
                Handle(self.slots.len() - 1)
            }
        }
    }

    // == Remove ==
    /// Frees the slot behind `handle` and returns its bucket.
    ///
    /// # Panics
    /// Panics if the handle does not refer to a live bucket.
    pub fn remove(&mut self, handle: Handle) -> Bucket<K, V> {
        let bucket = self
            .slots
            .get_mut(handle.0)
            .and_then(Option::take)
            .unwrap_or_else(|| panic!("stale bucket handle {}", handle.0));
        self.vacant.push(handle.0);
        bucket
    }

    // == Lookup ==
    /// Returns the bucket behind `handle`.
    ///
    /// # Panics
    /// Panics if the handle does not refer to a live bucket.
    pub fn get(&self, handle: Handle) -> &Bucket<K, V> {
        match self.slots.get(handle.0) {
            Some(Some(bucket)) => bucket,
            _ => panic!("stale bucket handle {}", handle.0),
        }
    }

    /// Mutable variant of [`get`](Self::get), used to update a bucket in place.
    ///
    /// # Panics
    /// Panics if the handle does not refer to a live bucket.
    pub fn get_mut(&mut self, handle: Handle) -> &mut Bucket<K, V> {
        match self.slots.get_mut(handle.0) {
            Some(Some(bucket)) => bucket,
            _ => panic!("stale bucket handle {}", handle.0),
        }
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bucket(key: &str, expiry: Instant) -> Bucket<String, u32> {
        Bucket::new(key.to_string(), 0, expiry, 0)
    }

    #[test]
    fn test_bucket_expiration_boundary() {
        let now = Instant::now();
        let entry = bucket("a", now);

        // Expired exactly at its expiry instant
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - Duration::from_nanos(1)));
    }

    #[test]
    fn test_arena_insert_and_get() {
        let mut buckets = Buckets::new();
        let now = Instant::now();

        let a = buckets.insert(bucket("a", now));
        let b = buckets.insert(bucket("b", now));

        assert_ne!(a, b);
        assert_eq!(buckets.get(a).key, "a");
        assert_eq!(buckets.get(b).key, "b");
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn test_arena_reuses_freed_slots() {
        let mut buckets = Buckets::new();
        let now = Instant::now();

        let a = buckets.insert(bucket("a", now));
        let _b = buckets.insert(bucket("b", now));
        let removed = buckets.remove(a);
        assert_eq!(removed.key, "a");
        assert_eq!(buckets.len(), 1);

        let c = buckets.insert(bucket("c", now));
        assert_eq!(c, a);
        assert_eq!(buckets.get(c).key, "c");
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn test_arena_get_mut_updates_in_place() {
        let mut buckets = Buckets::new();
        let handle = buckets.insert(bucket("a", Instant::now()));

        buckets.get_mut(handle).value = 42;
        buckets.get_mut(handle).position = 7;

        assert_eq!(buckets.get(handle).value, 42);
        assert_eq!(buckets.get(handle).position, 7);
    }

    #[test]
    #[should_panic(expected = "stale bucket handle")]
    fn test_arena_remove_twice_panics() {
        let mut buckets = Buckets::new();
        let handle = buckets.insert(bucket("a", Instant::now()));

        buckets.remove(handle);
        buckets.remove(handle);
    }
}
