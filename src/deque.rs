//! Chase-Lev work-stealing deque.
//!
//! A single-producer/multi-consumer lock-free double-ended queue. The
//! owning thread pushes and pops from the bottom; any number of thief
//! threads may concurrently steal from the top. See Chase & Lev,
//! "Dynamic Circular Work-Stealing Deque" (2005).
//!
//! This type has no knowledge of the scheduler built on top of it in
//! [`crate::pool`] — it is a general-purpose concurrent data structure and
//! is exported standalone.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::sync::atomic::{fence, AtomicIsize, AtomicPtr, AtomicU64, Ordering};

const MIN_CAPACITY: usize = 32;
const MAX_CAPACITY: usize = 1 << 30;

/// Lightweight push/pop/steal/grow counters, read through plain relaxed
/// loads. Cheap enough to leave enabled unconditionally; no metrics crate
/// is warranted for four counters.
#[derive(Default)]
pub struct DequeStats {
    pushes: AtomicU64,
    owner_pops: AtomicU64,
    steals: AtomicU64,
    grows: AtomicU64,
}

impl DequeStats {
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    pub fn owner_pops(&self) -> u64 {
        self.owner_pops.load(Ordering::Relaxed)
    }

    pub fn steals(&self) -> u64 {
        self.steals.load(Ordering::Relaxed)
    }

    pub fn grows(&self) -> u64 {
        self.grows.load(Ordering::Relaxed)
    }
}

/// A power-of-two circular buffer. Slots are `MaybeUninit` because the
/// live range `[top, bottom)` only ever covers a subset of the capacity;
/// reading or writing outside that range is the caller's responsibility.
struct Buffer<T> {
    storage: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

impl<T> Buffer<T> {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let storage = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            storage,
            mask: capacity - 1,
        }
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bitwise-copies the value out of `index` without running its
    /// destructor or invalidating the slot's bytes.
    ///
    /// # Safety
    /// The caller must ensure the slot at `index` is initialized, and
    /// must not treat both this copy and the original slot as owned
    /// (exactly one side may run the value's destructor).
    unsafe fn read(&self, index: isize) -> T {
        let slot = (index as usize) & self.mask;
        ptr::read((*self.storage[slot].get()).as_ptr())
    }

    /// # Safety
    /// The caller must have exclusive (owner-only) access to this slot.
    unsafe fn write(&self, index: isize, value: T) {
        let slot = (index as usize) & self.mask;
        (*self.storage[slot].get()).write(value);
    }

    /// Bitwise-copies the live range `[top, bottom)` of `self` into `dst`,
    /// which must have at least that many slots of capacity.
    ///
    /// # Safety
    /// Every slot in `[top, bottom)` of `self` must be initialized.
    unsafe fn copy_into(&self, dst: &Buffer<T>, top: isize, bottom: isize) {
        let mut i = top;
        while i != bottom {
            dst.write(i, self.read(i));
            i = i.wrapping_add(1);
        }
    }
}

// Buffer is only ever accessed through the deque's synchronization
// discipline (owner exclusive on bottom, CAS-arbitrated on top).
unsafe impl<T: Send> Send for Buffer<T> {}
unsafe impl<T: Send> Sync for Buffer<T> {}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        // Live elements are taken out (and dropped) by the owning
        // `WorkStealingDeque` before its buffers are freed; the storage
        // here may hold stale bytes from already-moved-out or
        // never-initialized slots, neither of which we may drop.
    }
}

/// Outcome of a steal attempt from the top of the deque.
#[derive(Debug)]
pub enum Steal<T> {
    /// A value was stolen.
    Success(T),
    /// The deque was empty.
    Empty,
    /// Lost a race with another thief or the owner; the caller should
    /// retry, as the deque's contents are unknown.
    Retry,
}

impl<T> Steal<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Steal::Success(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Steal::Empty)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }

    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(v) => Some(v),
            _ => None,
        }
    }
}

/// Exponential-backoff helper for spinning on a failed CAS before
/// retrying or yielding to the scheduler. Useful to callers driving
/// [`WorkStealingDeque::pop_top`] directly; the pool's own worker loop
/// uses the simpler mutex-guarded [`crate::queue::ThreadSafeDeque`] as
/// its default per-worker queue and has no need for it internally.
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const MAX_SPIN_STEP: u32 = 10;
    const YIELD_AFTER: u32 = 6;

    pub fn new() -> Self {
        Self { step: 0 }
    }

    pub fn spin(&mut self) {
        for _ in 0..(1u32 << self.step.min(Self::MAX_SPIN_STEP)) {
            std::hint::spin_loop();
        }
        self.step = self.step.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    pub fn should_yield(&self) -> bool {
        self.step > Self::YIELD_AFTER
    }

    /// Spin, or yield to the scheduler once backoff has escalated.
    pub fn snooze(&mut self) {
        if self.should_yield() {
            std::thread::yield_now();
        } else {
            self.spin();
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// A lock-free single-producer/multi-consumer work-stealing deque.
///
/// `push_bottom` and `take_bottom` may only be called by a single owning
/// thread. `pop_top` may be called concurrently from any number of thief
/// threads.
pub struct WorkStealingDeque<T> {
    bottom: CachePadded<AtomicIsize>,
    top: CachePadded<AtomicIsize>,
    buffer: AtomicPtr<Buffer<T>>,
    /// Retired buffers from past grows. Only ever touched by the owner
    /// (the same thread that calls `push_bottom`), so the `UnsafeCell`
    /// needs no further synchronization.
    garbage: UnsafeCell<Vec<Box<Buffer<T>>>>,
    stats: DequeStats,
}

impl<T> WorkStealingDeque<T> {
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let buffer = Box::into_raw(Box::new(Buffer::new(capacity)));
        Self {
            bottom: CachePadded::new(AtomicIsize::new(0)),
            top: CachePadded::new(AtomicIsize::new(0)),
            buffer: AtomicPtr::new(buffer),
            garbage: UnsafeCell::new(Vec::new()),
            stats: DequeStats::default(),
        }
    }

    /// Push/pop/steal/grow counters accumulated over this deque's lifetime.
    pub fn stats(&self) -> &DequeStats {
        &self.stats
    }

    /// Current capacity of the live buffer. Best-effort; may change
    /// concurrently if called from a thief while the owner grows.
    pub fn capacity(&self) -> usize {
        unsafe { (*self.buffer.load(Ordering::Acquire)).capacity() }
    }

    /// Best-effort size: `max(bottom - top, 0)`.
    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a value onto the bottom of the deque. Owner-only.
    pub fn push_bottom(&self, value: T) {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let mut buf = unsafe { &*self.buffer.load(Ordering::Relaxed) };

        if (buf.capacity() as isize) - 1 < b - t {
            let new_capacity = (buf.capacity() * 2).min(MAX_CAPACITY);
            let new_buf = Box::new(Buffer::new(new_capacity));
            unsafe { buf.copy_into(&new_buf, t, b) };
            let new_ptr = Box::into_raw(new_buf);
            let old_ptr = self.buffer.swap(new_ptr, Ordering::Release);
            // Safety: only the owner mutates `garbage`, and we are it.
            unsafe { (*self.garbage.get()).push(Box::from_raw(old_ptr)) };
            buf = unsafe { &*new_ptr };
            self.stats.grows.fetch_add(1, Ordering::Relaxed);
        }

        unsafe { buf.write(b, value) };
        // Synchronizes with the acquire fence in `pop_top`: the write
        // above must be visible to any thief that observes `bottom`.
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
        self.stats.pushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Pop a value from the bottom of the deque. Owner-only. Returns
    /// `None` if the deque is empty, or if the last element was won by a
    /// racing thief.
    pub fn take_bottom(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(b, Ordering::Relaxed);
        // This is the Chase-Lev synchronization point: it establishes a
        // total order with the fence in `pop_top` for the race over the
        // last element.
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // Was already empty; restore bottom.
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        let buf = unsafe { &*self.buffer.load(Ordering::Relaxed) };
        if t == b {
            // Last element: race the top CAS against any stealer.
            let value = unsafe { buf.read(b) };
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b + 1, Ordering::Relaxed);
            if won {
                self.stats.owner_pops.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            // A thief claimed it first; our speculative copy must not
            // be dropped (there is only one true owner of those bytes).
            mem::forget(value);
            return None;
        }

        self.stats.owner_pops.fetch_add(1, Ordering::Relaxed);
        Some(unsafe { buf.read(b) })
    }

    /// Attempt to steal a value from the top of the deque. May be called
    /// concurrently by any number of threads.
    pub fn pop_top(&self) -> Steal<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);

        if t >= b {
            return Steal::Empty;
        }

        let buf = unsafe { &*self.buffer.load(Ordering::Acquire) };
        let value = unsafe { buf.read(t) };
        if self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            self.stats.steals.fetch_add(1, Ordering::Relaxed);
            Steal::Success(value)
        } else {
            mem::forget(value);
            Steal::Retry
        }
    }
}

impl<T> Default for WorkStealingDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for WorkStealingDeque<T> {
    fn drop(&mut self) {
        while self.take_bottom().is_some() {}
        let buf = self.buffer.load(Ordering::Relaxed);
        unsafe { drop(Box::from_raw(buf)) };
        // `garbage` drops automatically after this body runs.
    }
}

// Safety: access to the buffer and counters follows the Chase-Lev
// synchronization discipline documented on each method.
unsafe impl<T: Send> Send for WorkStealingDeque<T> {}
unsafe impl<T: Send> Sync for WorkStealingDeque<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn push_then_pop_is_lifo_for_owner() {
        let deque = WorkStealingDeque::new();
        deque.push_bottom(1);
        deque.push_bottom(2);
        deque.push_bottom(3);

        assert_eq!(deque.take_bottom(), Some(3));
        assert_eq!(deque.take_bottom(), Some(2));
        assert_eq!(deque.take_bottom(), Some(1));
        assert_eq!(deque.take_bottom(), None);
    }

    #[test]
    fn steal_takes_from_the_top() {
        let deque = Arc::new(WorkStealingDeque::new());
        deque.push_bottom(1);
        deque.push_bottom(2);
        deque.push_bottom(3);

        assert_eq!(deque.pop_top().success(), Some(1));
        assert_eq!(deque.take_bottom(), Some(3));
        assert_eq!(deque.take_bottom(), Some(2));
        assert_eq!(deque.take_bottom(), None);
    }

    #[test]
    fn grows_past_initial_capacity_without_losing_values() {
        let deque = WorkStealingDeque::new();
        for i in 0..1000 {
            deque.push_bottom(i);
        }
        assert!(deque.capacity() > MIN_CAPACITY);
        for i in (0..1000).rev() {
            assert_eq!(deque.take_bottom(), Some(i));
        }
        assert_eq!(deque.take_bottom(), None);
    }

    #[test]
    fn single_element_race_has_exactly_one_winner() {
        // Invariant 5/6 (spec §8): for one owner racing N thieves over a
        // single remaining element, exactly one observer wins and the
        // rest see empty/retry-collapsed-to-empty.
        for _ in 0..200 {
            let deque = Arc::new(WorkStealingDeque::new());
            deque.push_bottom(42usize);

            let winners = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(5));
            let mut handles = Vec::new();

            {
                let deque = deque.clone();
                let winners = winners.clone();
                let barrier = barrier.clone();
                handles.push(thread::spawn(move || {
                    barrier.wait();
                    if deque.take_bottom().is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                }));
            }

            for _ in 0..4 {
                let deque = deque.clone();
                let winners = winners.clone();
                let barrier = barrier.clone();
                handles.push(thread::spawn(move || {
                    barrier.wait();
                    loop {
                        match deque.pop_top() {
                            Steal::Success(_) => {
                                winners.fetch_add(1, Ordering::SeqCst);
                                break;
                            }
                            Steal::Empty => break,
                            Steal::Retry => continue,
                        }
                    }
                }));
            }

            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn stats_count_pushes_pops_steals_and_grows() {
        let deque = WorkStealingDeque::with_capacity(4);
        for i in 0..10 {
            deque.push_bottom(i);
        }
        assert_eq!(deque.stats().pushes(), 10);
        assert!(deque.stats().grows() >= 1);

        assert_eq!(deque.pop_top().success(), Some(0));
        assert_eq!(deque.stats().steals(), 1);

        assert!(deque.take_bottom().is_some());
        assert_eq!(deque.stats().owner_pops(), 1);
    }

    #[test]
    fn concurrent_steal_observes_every_value_exactly_once() {
        let deque = Arc::new(WorkStealingDeque::new());
        for i in 0..10_000 {
            deque.push_bottom(i);
        }

        let barrier = Arc::new(Barrier::new(9));
        let mut handles = Vec::new();

        {
            let deque = deque.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut seen = Vec::new();
                while let Some(v) = deque.take_bottom() {
                    seen.push(v);
                }
                seen
            }));
        }

        for _ in 0..8 {
            let deque = deque.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut seen = Vec::new();
                loop {
                    match deque.pop_top() {
                        Steal::Success(v) => seen.push(v),
                        Steal::Empty => break,
                        Steal::Retry => continue,
                    }
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..10_000).collect::<Vec<_>>());
    }
}
