use thiserror::Error;

/// Errors surfaced by the thread pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The task panicked during invocation. The payload is the panic
    /// message when it could be recovered as a `&str` or `String`.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The task's envelope was discarded (for instance by
    /// `ThreadPool::clear_tasks`) without ever being invoked, so its
    /// `TaskHandle` would otherwise have blocked on `join` forever.
    #[error("task handle was dropped before completion")]
    HandleDropped,

    /// `std::thread::Builder::spawn` failed while constructing the pool.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawnFailed(#[from] std::io::Error),

    /// A handle-returning submission targeted a pool with zero workers.
    #[error("cannot submit a task expecting a result to a pool with no workers")]
    NoWorkers,
}

pub type Result<T> = std::result::Result<T, PoolError>;
