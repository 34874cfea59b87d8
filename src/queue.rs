//! Mutex-guarded double-ended queue.
//!
//! Simpler and slower than [`crate::deque::WorkStealingDeque`], but
//! sufficient for correctness. Used as the default per-worker task queue
//! and, with a worker index as its element type, as the dispatch ring.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A mutex-guarded deque supporting push/pop at either end, a `steal`
/// accessor equivalent to `pop_back`, and the rotation helpers used by
/// the dispatch ring.
pub struct ThreadSafeDeque<T> {
    data: Mutex<VecDeque<T>>,
}

impl<T> ThreadSafeDeque<T> {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_front(&self, value: T) {
        self.data.lock().push_front(value);
    }

    pub fn push_back(&self, value: T) {
        self.data.lock().push_back(value);
    }

    pub fn pop_front(&self) -> Option<T> {
        self.data.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.data.lock().pop_back()
    }

    /// Steal a value from the back of the queue. Equivalent to
    /// `pop_back`; named separately so call sites read as what they are
    /// doing (a peer stealing from this worker's queue).
    pub fn steal(&self) -> Option<T> {
        self.pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Remove every element and return how many were removed.
    pub fn clear(&self) -> usize {
        let mut data = self.data.lock();
        let count = data.len();
        data.clear();
        count
    }
}

impl<T: PartialEq> ThreadSafeDeque<T> {
    /// Remove the first occurrence of `value` and re-insert it at the
    /// front. If `value` isn't present, it is simply inserted at the
    /// front.
    pub fn rotate_to_front(&self, value: T) {
        let mut data = self.data.lock();
        if let Some(pos) = data.iter().position(|v| *v == value) {
            data.remove(pos);
        }
        data.push_front(value);
    }
}

impl<T: Clone> ThreadSafeDeque<T> {
    /// Atomically read the front element and move it to the back. This
    /// is the dispatch assignment primitive (§4.D): it picks a
    /// destination and immediately demotes it so the next submission
    /// round-robins onward.
    pub fn copy_front_and_rotate_to_back(&self) -> Option<T> {
        let mut data = self.data.lock();
        let front = data.pop_front()?;
        data.push_back(front.clone());
        Some(front)
    }
}

impl<T> Default for ThreadSafeDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}
