//! Expiry Heap Module
//!
//! Binary min-heap of bucket handles ordered by expiry.
//!
//! The heap only stores handles; the expiries it compares and the positions it
//! maintains live on the buckets themselves, so every operation takes the
//! bucket arena alongside. Whenever a handle moves, the bucket's `position` is
//! rewritten, which is what lets the cache remove or reposition an arbitrary
//! entry in O(log n) without searching for it.
//!
//! Buckets with equal expiries have no defined relative order.

use crate::cache::bucket::{Buckets, Handle};

// == Expiry Heap ==
/// Min-heap of handles keyed on the bucket expiry.
#[derive(Debug, Default)]
pub struct ExpiryHeap {
    handles: Vec<Handle>,
}

impl ExpiryHeap {
    // == Constructor ==
    /// Creates an empty heap with room for `capacity` handles.
    ///
    /// # Arguments
    /// * `capacity` - Number of handles to preallocate
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handles: Vec::with_capacity(capacity),
        }
    }

    // == Peek ==
    /// Returns the handle of the soonest-to-expire bucket without removing it.
    pub fn peek(&self) -> Option<Handle> {
        self.handles.first().copied()
    }

    // == Push ==
    /// Appends a handle and sifts it up into place.
    pub fn push<K, V>(&mut self, handle: Handle, buckets: &mut Buckets<K, V>) {
        let position = self.handles.len();
        self.handles.push(handle);
        buckets.get_mut(handle).position = position;
        self.sift_up(position, buckets);
    }

    // == Remove ==
    /// Removes the handle at `position` and returns it.
    ///
    /// The last handle takes over the vacated slot and is sifted in whichever
    /// direction restores heap order.
    ///
    /// # Panics
    /// Panics if `position` is out of bounds. Positions come from bucket
    /// bookkeeping, so this only happens if that bookkeeping is broken.
    pub fn remove<K, V>(&mut self, position: usize, buckets: &mut Buckets<K, V>) -> Handle {
        assert!(
            position < self.handles.len(),
            "heap position {} out of bounds (len {})",
            position,
            self.handles.len()
        );

        let handle = self.handles.swap_remove(position);
        if position < self.handles.len() {
            let moved = self.handles[position];
            buckets.get_mut(moved).position = position;
            self.fix(position, buckets);
        }
        handle
    }

    // == Fix ==
    /// Restores heap order after the expiry at `position` changed in place.
    pub fn fix<K, V>(&mut self, position: usize, buckets: &mut Buckets<K, V>) {
        if !self.sift_down(position, buckets) {
            self.sift_up(position, buckets);
        }
    }

    /// Number of handles in the heap.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    // == Internals ==
    fn less<K, V>(&self, i: usize, j: usize, buckets: &Buckets<K, V>) -> bool {
        buckets.get(self.handles[i]).expiry < buckets.get(self.handles[j]).expiry
    }

    fn swap<K, V>(&mut self, i: usize, j: usize, buckets: &mut Buckets<K, V>) {
        self.handles.swap(i, j);
        buckets.get_mut(self.handles[i]).position = i;
        buckets.get_mut(self.handles[j]).position = j;
    }

    fn sift_up<K, V>(&mut self, mut position: usize, buckets: &mut Buckets<K, V>) {
        while position > 0 {
            let parent = (position - 1) / 2;
            if !self.less(position, parent, buckets) {
                break;
            }
            self.swap(position, parent, buckets);
            position = parent;
        }
    }

    /// Returns true if the handle moved.
    fn sift_down<K, V>(&mut self, start: usize, buckets: &mut Buckets<K, V>) -> bool {
        let len = self.handles.len();
        let mut position = start;
        loop {
            let left = 2 * position + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left, buckets) {
                right
            } else {
                left
            };
            if !self.less(child, position, buckets) {
                break;
            }
            self.swap(position, child, buckets);
            position = child;
        }
        position > start
    }

    #[cfg(test)]
    pub fn handle_at(&self, position: usize) -> Handle {
        self.handles[position]
    }

    /// Asserts heap order and that every bucket knows its own position.
    #[cfg(test)]
    pub fn assert_consistent<K, V>(&self, buckets: &Buckets<K, V>) {
        for (position, handle) in self.handles.iter().enumerate() {
            let bucket = buckets.get(*handle);
            assert_eq!(bucket.position, position, "bucket position out of sync");
            if position > 0 {
                let parent = buckets.get(self.handles[(position - 1) / 2]);
                assert!(parent.expiry <= bucket.expiry, "heap order violated at {position}");
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::bucket::Bucket;
    use std::time::{Duration, Instant};

    /// Builds a heap from expiry offsets in seconds, keyed by the offset.
    fn build(offsets: &[u64]) -> (ExpiryHeap, Buckets<u64, ()>, Instant) {
        let base = Instant::now();
        let mut heap = ExpiryHeap::default();
        let mut buckets = Buckets::new();
        for &offset in offsets {
            let expiry = base + Duration::from_secs(offset);
            let handle = buckets.insert(Bucket::new(offset, (), expiry, heap.len()));
            heap.push(handle, &mut buckets);
        }
        (heap, buckets, base)
    }

    fn root_key(heap: &ExpiryHeap, buckets: &Buckets<u64, ()>) -> Option<u64> {
        heap.peek().map(|handle| buckets.get(handle).key)
    }

    #[test]
    fn test_heap_peek_empty() {
        let heap = ExpiryHeap::default();
        assert!(heap.peek().is_none());
        assert!(heap.is_empty());
    }

    #[test]
    fn test_heap_push_keeps_minimum_at_root() {
        let (heap, buckets, _) = build(&[50, 20, 80, 10, 30]);

        assert_eq!(heap.len(), 5);
        assert_eq!(root_key(&heap, &buckets), Some(10));
        heap.assert_consistent(&buckets);
    }

    #[test]
    fn test_heap_remove_root_drains_in_order() {
        let (mut heap, mut buckets, _) = build(&[7, 3, 9, 1, 5, 8, 2]);
        let mut drained = Vec::new();

        while let Some(handle) = heap.peek() {
            let removed = heap.remove(buckets.get(handle).position, &mut buckets);
            assert_eq!(removed, handle);
            drained.push(buckets.remove(removed).key);
            heap.assert_consistent(&buckets);
        }

        assert_eq!(drained, vec![1, 2, 3, 5, 7, 8, 9]);
    }

    #[test]
    fn test_heap_remove_arbitrary_position() {
        let (mut heap, mut buckets, _) = build(&[1, 10, 2, 11, 12, 3, 4]);

        // Removing from the middle may require sifting the moved handle up
        let handle = heap.handles[4];
        let removed = heap.remove(4, &mut buckets);
        assert_eq!(removed, handle);
        buckets.remove(removed);

        assert_eq!(heap.len(), 6);
        heap.assert_consistent(&buckets);
    }

    #[test]
    fn test_heap_remove_last_position() {
        let (mut heap, mut buckets, _) = build(&[1, 2, 3]);
        let last = heap.len() - 1;
        let handle = heap.handles[last];

        assert_eq!(heap.remove(last, &mut buckets), handle);
        buckets.remove(handle);
        heap.assert_consistent(&buckets);
        assert_eq!(root_key(&heap, &buckets), Some(1));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_heap_remove_out_of_bounds_panics() {
        let (mut heap, mut buckets, _) = build(&[1, 2]);
        heap.remove(2, &mut buckets);
    }

    #[test]
    fn test_heap_fix_after_expiry_moves_later() {
        let (mut heap, mut buckets, base) = build(&[1, 2, 3, 4, 5]);
        let root = heap.peek().unwrap();

        buckets.get_mut(root).expiry = base + Duration::from_secs(100);
        heap.fix(0, &mut buckets);

        assert_eq!(root_key(&heap, &buckets), Some(2));
        assert_eq!(buckets.get(root).position, heap.handles.iter().position(|h| *h == root).unwrap());
        heap.assert_consistent(&buckets);
    }

    #[test]
    fn test_heap_fix_after_expiry_moves_earlier() {
        let (mut heap, mut buckets, base) = build(&[10, 20, 30, 40, 50]);
        let handle = heap.handles[4];

        buckets.get_mut(handle).expiry = base;
        heap.fix(4, &mut buckets);

        assert_eq!(heap.peek(), Some(handle));
        assert_eq!(buckets.get(handle).position, 0);
        heap.assert_consistent(&buckets);
    }

    #[test]
    fn test_heap_equal_expiries() {
        let (mut heap, mut buckets, _) = build(&[5, 5, 5, 5]);
        heap.assert_consistent(&buckets);

        let removed = heap.remove(1, &mut buckets);
        buckets.remove(removed);
        heap.assert_consistent(&buckets);
        assert_eq!(heap.len(), 3);
    }
}
