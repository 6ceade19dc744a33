//! Fixed-capacity ring buffer used as the playback keyframe store.
//!
//! Pushing into a full deque evicts the oldest element; prepending into a
//! full deque evicts the newest. Logical index 0 is always the oldest
//! retained element.
//!
//! ```
//! use vuer_core::core::deque::Deque;
//!
//! let mut d = Deque::new(3);
//! for i in 1..=6 {
//!     d.push(i);
//! }
//! assert_eq!(d.to_vec(), vec![4, 5, 6]);
//! ```

use log::warn;

#[derive(Debug, Clone)]
pub struct Deque<T> {
    buffer: Vec<Option<T>>,
    maxlen: usize,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> Deque<T> {
    /// Create an empty deque. A zero capacity is clamped to 1.
    pub fn new(maxlen: usize) -> Self {
        let maxlen = if maxlen == 0 {
            warn!("Deque capacity must be at least 1, clamping 0 -> 1");
            1
        } else {
            maxlen
        };
        Self {
            buffer: Self::fresh_buffer(maxlen),
            maxlen,
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Build a deque from an iterator, pushing oldest-first so that only the
    /// newest `maxlen` items survive.
    pub fn from_iter_with_capacity<I: IntoIterator<Item = T>>(items: I, maxlen: usize) -> Self {
        let mut deque = Self::new(maxlen);
        for item in items {
            deque.push(item);
        }
        deque
    }

    fn fresh_buffer(maxlen: usize) -> Vec<Option<T>> {
        std::iter::repeat_with(|| None).take(maxlen).collect()
    }

    pub fn maxlen(&self) -> usize {
        self.maxlen
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.maxlen
    }

    /// Append at the tail, evicting the oldest element when full.
    pub fn push(&mut self, item: T) {
        if self.len == self.maxlen {
            self.head = (self.head + 1) % self.maxlen;
        } else {
            self.len += 1;
        }
        self.buffer[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.maxlen;
    }

    /// Insert at the head, evicting the newest element when full.
    pub fn prepend(&mut self, item: T) {
        if self.len == self.maxlen {
            self.tail = (self.tail + self.maxlen - 1) % self.maxlen;
        } else {
            self.len += 1;
        }
        self.head = (self.head + self.maxlen - 1) % self.maxlen;
        self.buffer[self.head] = Some(item);
    }

    /// Element at logical position `index` (0 = oldest).
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.buffer[(self.head + index) % self.maxlen].as_ref()
    }

    /// Like [`Deque::get`] but falls back to `default` when out of range.
    pub fn get_or<'a>(&'a self, index: usize, default: &'a T) -> &'a T {
        self.get(index).unwrap_or(default)
    }

    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Iterate oldest -> newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    /// Reset to empty with a fresh allocation of the same capacity.
    pub fn clear(&mut self) {
        self.buffer = Self::fresh_buffer(self.maxlen);
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

impl<T: Clone> Deque<T> {
    /// Materialize the logical sequence oldest -> newest.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Copy into a deque of a different capacity. When shrinking, the oldest
    /// elements are the ones dropped.
    pub fn resized(&self, maxlen: usize) -> Self {
        Self::from_iter_with_capacity(self.iter().cloned(), maxlen)
    }
}
