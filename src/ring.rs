//! Dispatch ring: picks a destination worker index for each submission.

use crate::queue::ThreadSafeDeque;

/// A rotating order of worker indices. Submission assigns a task to
/// `copy_front_and_rotate_to_back`'s result; a worker that just drained
/// its local queue calls `rotate_to_front` to become the preferred next
/// target (hot cache, no contention).
pub struct DispatchRing {
    order: ThreadSafeDeque<usize>,
}

impl DispatchRing {
    /// Build a ring over `[0, num_workers)`.
    pub fn new(num_workers: usize) -> Self {
        let order = ThreadSafeDeque::new();
        for id in 0..num_workers {
            order.push_back(id);
        }
        Self { order }
    }

    /// Pick the current preferred destination and demote it to the
    /// back. Returns `None` for a degenerate (zero-worker) ring.
    pub fn next_destination(&self) -> Option<usize> {
        self.order.copy_front_and_rotate_to_back()
    }

    /// Mark `id` as the preferred next destination.
    pub fn prefer(&self, id: usize) {
        self.order.rotate_to_front(id);
    }

    /// Drop `id` from the ring entirely (used when a worker thread fails
    /// to spawn and its slot is rolled back).
    pub fn remove(&self, id: usize) {
        // `rotate_to_front` followed by a pop gives us an exact removal
        // without introducing a third locking primitive on the deque.
        self.order.rotate_to_front(id);
        let _ = self.order.pop_front();
    }
}
