// thread_pool - a work-stealing thread pool
// Core library module

pub mod config;
pub mod deque;
pub mod error;
pub mod pool;
pub mod queue;
pub mod ring;
pub mod signal;
mod task;
mod worker;

pub use config::PoolBuilder;
pub use deque::{Backoff, DequeStats, Steal, WorkStealingDeque};
pub use error::{PoolError, Result};
pub use pool::ThreadPool;
pub use task::TaskHandle;
pub use worker::PoolStats;

/// Hardware parallelism, falling back to 1 if it can't be determined.
/// Used as the default worker count for [`PoolBuilder`].
pub fn default_parallelism() -> usize {
    num_cpus::get().max(1)
}
