//! Fixed-capacity FIFO with overwrite semantics (§4.1).

/// A fixed-capacity ring buffer. Not concurrency-safe: callers are expected
/// to hold an outer lock (see `EventStore`).
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: std::collections::VecDeque<T>,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer with the given capacity. `capacity` is clamped to
    /// at least 1 so the buffer is never degenerate.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    /// Pushes an item, overwriting the oldest entry once the buffer is full.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Returns all stored items, oldest first.
    pub fn get_all(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_oldest_when_full() {
        let mut rb = RingBuffer::new(3);
        rb.push(1);
        rb.push(2);
        rb.push(3);
        rb.push(4);
        assert_eq!(rb.get_all(), vec![2, 3, 4]);
        assert_eq!(rb.size(), 3);
    }

    #[test]
    fn get_all_returns_oldest_to_newest_under_capacity() {
        let mut rb = RingBuffer::new(5);
        rb.push("a");
        rb.push("b");
        assert_eq!(rb.get_all(), vec!["a", "b"]);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut rb = RingBuffer::new(2);
        rb.push(1);
        rb.clear();
        assert_eq!(rb.size(), 0);
        assert!(rb.get_all().is_empty());
    }

    proptest::proptest! {
        #[test]
        fn rb1_tail_property(n in 1usize..16, seq in proptest::collection::vec(0i64..1000, 0..64)) {
            let mut rb = RingBuffer::new(n);
            for &x in &seq {
                rb.push(x);
            }
            let expected: Vec<i64> = seq.iter().rev().take(n).rev().cloned().collect();
            proptest::prop_assert_eq!(rb.get_all(), expected);
        }
    }
}
