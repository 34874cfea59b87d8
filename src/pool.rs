//! The public thread pool facade.

use crate::config::PoolBuilder;
use crate::error::{PoolError, Result};
use crate::task::{self, BoxedTask, TaskHandle};
use crate::worker::{self, PoolShared};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A fixed-size pool of worker threads, each with its own task queue,
/// that steal from one another when idle.
///
/// Dropping the pool blocks until every queued and in-flight task has
/// run (equivalent to calling [`ThreadPool::wait_for_tasks`] first),
/// then stops and joins every worker thread.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Build a pool with the platform's default parallelism.
    pub fn new() -> Result<Self> {
        PoolBuilder::new().build()
    }

    /// Start configuring a pool.
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    pub(crate) fn from_builder(builder: PoolBuilder) -> Result<Self> {
        let num_threads = builder.num_threads_value();
        let shared = Arc::new(PoolShared::new(num_threads));
        let stop = Arc::new(AtomicBool::new(false));
        let on_thread_start = builder.on_thread_start_value();

        let mut handles = Vec::with_capacity(num_threads);
        for id in 0..num_threads {
            let mut spawn = std::thread::Builder::new().name(format!("{}-{id}", builder.thread_name_value()));
            if let Some(stack_size) = builder.stack_size_value() {
                spawn = spawn.stack_size(stack_size);
            }

            let shared_for_worker = Arc::clone(&shared);
            let stop_for_worker = Arc::clone(&stop);
            let init = on_thread_start.clone();

            match spawn.spawn(move || worker::run(id, shared_for_worker, stop_for_worker, init)) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Roll back just this slot's ring entry and keep
                    // going: a pool with fewer workers than requested is
                    // a supported outcome, not a construction failure
                    // (SPEC_FULL.md §4.E, §7).
                    tracing::warn!(
                        worker = id,
                        error = %err,
                        "failed to spawn worker thread; downsizing pool",
                    );
                    shared.ring.remove(id);
                }
            }
        }

        tracing::info!(workers = handles.len(), requested = num_threads, "thread pool constructed");
        Ok(Self { shared, stop, handles })
    }

    /// Number of worker threads actually running in the pool. May be
    /// less than requested if some worker threads failed to spawn.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Submitted/completed/stolen task counters accumulated over the
    /// pool's lifetime.
    pub fn stats(&self) -> &worker::PoolStats {
        &self.shared.stats
    }

    /// Submit a task and get back a handle to its eventual result (or
    /// the panic it raised). Fails with [`PoolError::NoWorkers`] on a
    /// zero-worker pool, since such a handle could never be joined.
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (envelope, handle) = task::envelope(f);
        let destination = self.shared.dispatch(envelope).ok_or(PoolError::NoWorkers)?;
        self.shared.wake(destination);
        Ok(handle)
    }

    /// Submit a task whose result is discarded. A panic inside it is
    /// caught and logged, never propagated. On a zero-worker pool the
    /// task is silently dropped rather than erroring — unlike [`Self::submit`],
    /// there is no handle whose absence would otherwise go unnoticed.
    pub fn submit_detach<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let envelope = task::detached(f);
        let Some(destination) = self.shared.dispatch(envelope) else {
            return Ok(());
        };
        self.shared.wake(destination);
        Ok(())
    }

    /// Submit many tasks as one batch. Every task is accounted for
    /// before any worker is woken, so a worker mid-drain can never
    /// observe a false quiescence partway through the batch; each
    /// distinct destination is then woken exactly once.
    pub fn submit_batch<F, T, I>(&self, tasks: I) -> Result<Vec<TaskHandle<T>>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut handles = Vec::new();
        let mut destinations = HashSet::new();

        for f in tasks {
            let (envelope, handle) = task::envelope(f);
            let destination = self.shared.dispatch(envelope).ok_or(PoolError::NoWorkers)?;
            destinations.insert(destination);
            handles.push(handle);
        }

        for destination in destinations {
            self.shared.wake(destination);
        }
        Ok(handles)
    }

    /// Block until every queued and in-flight task has completed.
    pub fn wait_for_tasks(&self) {
        self.shared.wait_for_tasks();
    }

    /// Drop every task still sitting in a queue (not yet running),
    /// reporting `HandleDropped` to anyone joined on it. Returns how
    /// many were discarded. Tasks already running are unaffected.
    pub fn clear_tasks(&self) -> usize {
        self.shared.clear_all()
    }

    fn shutdown(&mut self) {
        tracing::info!(workers = self.handles.len(), "thread pool shutting down");
        self.wait_for_tasks();
        self.stop.store(true, Ordering::Release);
        for slot in &self.shared.slots {
            slot.signal.release();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("thread pool shutdown complete");
    }
}

impl Default for ThreadPool {
    /// # Panics
    ///
    /// Panics if worker threads could not be spawned. Use [`ThreadPool::new`]
    /// to handle that failure instead.
    fn default() -> Self {
        Self::new().expect("failed to build default thread pool")
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn submit_returns_the_computed_value() {
        let pool = ThreadPool::builder().num_threads(2).build().unwrap();
        let handle = pool.submit(|| 2 + 2).unwrap();
        assert_eq!(handle.join().unwrap(), 4);
    }

    #[test]
    fn submit_detach_runs_and_is_joined_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::builder().num_threads(2).build().unwrap();
            for _ in 0..10 {
                let counter = counter.clone();
                pool.submit_detach(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn submit_batch_runs_every_task_exactly_once() {
        let pool = ThreadPool::builder().num_threads(4).build().unwrap();
        let tasks = (0..50).map(|i| move || i * 2);
        let handles = pool.submit_batch(tasks).unwrap();
        let results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let expected: Vec<i32> = (0..50).map(|i| i * 2).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn zero_worker_pool_rejects_handle_submissions() {
        let pool = ThreadPool::builder().num_threads(0).build().unwrap();
        match pool.submit(|| 1) {
            Err(PoolError::NoWorkers) => {}
            other => panic!("expected NoWorkers, got {other:?}"),
        }
    }

    #[test]
    fn zero_worker_pool_drops_detached_submissions_without_erroring() {
        let pool = ThreadPool::builder().num_threads(0).build().unwrap();
        assert!(pool.submit_detach(|| panic!("never runs")).is_ok());
    }

    #[test]
    fn wait_for_tasks_blocks_until_everything_completes() {
        let pool = ThreadPool::builder().num_threads(4).build().unwrap();
        let sum = Arc::new(Mutex::new(0));
        for i in 1..=1000 {
            let sum = sum.clone();
            pool.submit_detach(move || {
                *sum.lock().unwrap() += i;
            })
            .unwrap();
        }
        pool.wait_for_tasks();
        assert_eq!(*sum.lock().unwrap(), 500_500);
    }

    #[test]
    fn a_panicking_task_does_not_take_down_its_worker() {
        let pool = ThreadPool::builder().num_threads(1).build().unwrap();
        let first = pool.submit(|| -> i32 { panic!("boom") }).unwrap();
        assert!(first.join().is_err());

        let second = pool.submit(|| 99).unwrap();
        assert_eq!(second.join().unwrap(), 99);
    }

    #[test]
    fn clear_tasks_discards_queued_but_not_running_work() {
        let pool = ThreadPool::builder().num_threads(1).build().unwrap();
        let blocker = pool.submit(|| {
            std::thread::sleep(std::time::Duration::from_millis(100));
        });
        let queued = pool.submit(|| 1);
        std::thread::sleep(std::time::Duration::from_millis(10));

        let cleared = pool.clear_tasks();
        assert_eq!(cleared, 1);
        match queued.unwrap().join() {
            Err(PoolError::HandleDropped) => {}
            other => panic!("expected HandleDropped, got {other:?}"),
        }
        blocker.unwrap().join().unwrap();
    }

    #[test]
    fn stats_track_submitted_and_completed_counts() {
        let pool = ThreadPool::builder().num_threads(4).build().unwrap();
        let handles: Vec<_> = (0..20).map(|i| pool.submit(move || i).unwrap()).collect();
        for h in handles {
            h.join().unwrap();
        }
        pool.wait_for_tasks();
        assert_eq!(pool.stats().submitted(), 20);
        assert_eq!(pool.stats().completed(), 20);
    }

    #[test]
    fn recursive_submission_reaches_quiescence() {
        let pool = ThreadPool::builder().num_threads(4).build().unwrap();
        let remaining = Arc::new(AtomicUsize::new(500));

        fn spawn_chain(pool: &Arc<ThreadPool>, remaining: Arc<AtomicUsize>) {
            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                return;
            }
            let pool2 = pool.clone();
            pool.submit_detach(move || spawn_chain(&pool2, remaining)).unwrap();
        }

        let pool = Arc::new(pool);
        spawn_chain(&pool, remaining.clone());
        pool.wait_for_tasks();
        assert_eq!(remaining.load(Ordering::SeqCst), 0);
    }
}
