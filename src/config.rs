//! Pool construction options.

use crate::error::Result;
use crate::pool::ThreadPool;
use std::sync::Arc;

/// Builder for [`ThreadPool`]. Mirrors the handful of knobs a native
/// thread actually exposes: how many of them to spawn, their stack
/// size, a name for diagnostics, and an optional per-thread init hook.
pub struct PoolBuilder {
    num_threads: usize,
    stack_size: Option<usize>,
    thread_name: String,
    on_thread_start: Option<Arc<dyn Fn(usize) + Send + Sync>>,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            num_threads: crate::default_parallelism(),
            stack_size: None,
            thread_name: "thread-pool-worker".to_string(),
            on_thread_start: None,
        }
    }

    /// Number of worker threads. Zero is accepted: submissions to a
    /// zero-worker pool fail fast with [`crate::error::PoolError::NoWorkers`]
    /// rather than parking forever.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Stack size, in bytes, for each worker thread. Defaults to the
    /// platform's `std::thread` default when unset.
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Base name for worker threads; each is suffixed with its index.
    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Callback invoked once on each worker thread before it begins
    /// serving tasks, receiving the worker's index. A panic inside it
    /// is caught and logged; it does not stop the worker from starting.
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_thread_start = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<ThreadPool> {
        ThreadPool::from_builder(self)
    }

    pub(crate) fn num_threads_value(&self) -> usize {
        self.num_threads
    }

    pub(crate) fn stack_size_value(&self) -> Option<usize> {
        self.stack_size
    }

    pub(crate) fn thread_name_value(&self) -> &str {
        &self.thread_name
    }

    pub(crate) fn on_thread_start_value(&self) -> Option<Arc<dyn Fn(usize) + Send + Sync>> {
        self.on_thread_start.clone()
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
