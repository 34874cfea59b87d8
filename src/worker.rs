//! The worker runtime: one OS thread per slot, each draining its own
//! queue before stealing from peers, and reporting quiescence once the
//! whole pool has nothing left in flight.

use crate::deque::Backoff;
use crate::queue::ThreadSafeDeque;
use crate::signal::{Signal, WaitableFlag};
use crate::task::BoxedTask;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Submitted/completed/stolen task counters for the whole pool, read
/// through plain relaxed loads. Mirrors [`crate::deque::DequeStats`] at
/// the scheduler level.
#[derive(Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    steals: AtomicU64,
}

impl PoolStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn steals(&self) -> u64 {
        self.steals.load(Ordering::Relaxed)
    }
}

/// Per-worker state: its own task queue and the wake signal that parks
/// it between bursts of work.
pub(crate) struct WorkerSlot {
    pub queue: ThreadSafeDeque<BoxedTask>,
    pub signal: Signal,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            queue: ThreadSafeDeque::new(),
            signal: Signal::new(),
        }
    }
}

/// State shared by every worker thread and the pool facade: the per-slot
/// queues, the dispatch ring, and the counters that drive
/// `wait_for_tasks`'s quiescence signal.
pub(crate) struct PoolShared {
    pub slots: Vec<Arc<WorkerSlot>>,
    pub ring: crate::ring::DispatchRing,
    unassigned: AtomicUsize,
    in_flight: AtomicUsize,
    quiescent: WaitableFlag,
    pub stats: PoolStats,
}

impl PoolShared {
    pub fn new(num_workers: usize) -> Self {
        Self {
            slots: (0..num_workers).map(|_| Arc::new(WorkerSlot::new())).collect(),
            ring: crate::ring::DispatchRing::new(num_workers),
            unassigned: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            quiescent: WaitableFlag::new(true),
            stats: PoolStats::default(),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.slots.len()
    }

    /// Push `task` onto the next dispatch destination and account for it.
    /// Returns the destination so the caller can wake it; `None` means a
    /// degenerate zero-worker pool.
    pub fn dispatch(&self, task: BoxedTask) -> Option<usize> {
        let id = self.ring.next_destination()?;
        self.account_submitted(1);
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.slots[id].queue.push_back(task);
        Some(id)
    }

    pub fn wake(&self, id: usize) {
        self.slots[id].signal.release();
    }

    /// Record `count` newly submitted tasks before any of them are
    /// pushed onto a queue, so a batch submission's wake signals never
    /// race a worker into observing a false quiescence.
    pub fn account_submitted(&self, count: usize) {
        if count == 0 {
            return;
        }
        let previous = self.in_flight.fetch_add(count, Ordering::AcqRel);
        self.unassigned.fetch_add(count, Ordering::AcqRel);
        if previous == 0 {
            self.quiescent.set(false);
        }
    }

    fn task_finished(&self) {
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        let remaining = self.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            self.quiescent.set(true);
        }
    }

    /// Drop every queued-but-not-yet-running task across every slot,
    /// dropping its envelope (and so, via `Producer::drop`, reporting
    /// `HandleDropped` to anyone joined on it). Returns how many were
    /// discarded.
    pub fn clear_all(&self) -> usize {
        let mut removed = 0;
        for slot in &self.slots {
            removed += slot.queue.clear();
        }
        if removed > 0 {
            self.unassigned.fetch_sub(removed, Ordering::AcqRel);
            let remaining = self.in_flight.fetch_sub(removed, Ordering::AcqRel) - removed;
            if remaining == 0 {
                self.quiescent.set(true);
            }
        }
        removed
    }

    pub fn wait_for_tasks(&self) {
        self.quiescent
            .wait_true(|| self.in_flight.load(Ordering::Acquire) == 0);
    }
}

/// The body of a worker thread: park on its signal, drain its own queue,
/// steal from peers round-robin, and report quiescence once nothing
/// remains in flight anywhere in the pool. Returns when `stop` is set
/// and the worker has been woken (one final time) to observe it.
pub(crate) fn run(
    id: usize,
    shared: Arc<PoolShared>,
    stop: Arc<AtomicBool>,
    on_thread_start: Option<Arc<dyn Fn(usize) + Send + Sync>>,
) {
    if let Some(init) = &on_thread_start {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| init(id))) {
            tracing::warn!(
                worker = id,
                panic = %crate::task::panic_message(payload),
                "on_thread_start callback panicked",
            );
        }
    }
    tracing::debug!(worker = id, "worker started");

    let num_workers = shared.num_workers();
    let slot = Arc::clone(&shared.slots[id]);

    loop {
        slot.signal.acquire();
        let mut backoff = Backoff::new();

        loop {
            let mut stolen = false;

            while let Some(task) = slot.queue.pop_front() {
                run_one(&shared, task);
                stolen = true;
            }

            for offset in 1..num_workers {
                let peer = (id + offset) % num_workers;
                if let Some(task) = shared.slots[peer].queue.steal() {
                    tracing::trace!(worker = id, from = peer, "stole a task");
                    shared.stats.steals.fetch_add(1, Ordering::Relaxed);
                    run_one(&shared, task);
                    stolen = true;
                    break;
                }
            }

            if shared.unassigned.load(Ordering::Acquire) == 0 {
                break;
            }
            if stolen {
                backoff.reset();
            } else {
                // Nothing local and every peer came up empty this pass,
                // but the unassigned count says work remains (it's
                // mid-dispatch elsewhere). Back off briefly rather than
                // busy-spinning or reparking on our own signal.
                backoff.snooze();
            }
        }

        shared.ring.prefer(id);

        if stop.load(Ordering::Acquire) {
            tracing::debug!(worker = id, "worker stopping");
            return;
        }
    }
}

fn run_one(shared: &PoolShared, task: BoxedTask) {
    shared.unassigned.fetch_sub(1, Ordering::AcqRel);
    task();
    shared.task_finished();
}
