//! Task envelope: turns a user closure into a boxed, type-erased, nullary
//! callable plus a [`TaskHandle`] that observes its outcome.

use crate::error::{PoolError, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// The uniform, type-erased slot every queue actually stores.
pub type BoxedTask = Box<dyn FnOnce() + Send>;

struct Shared<T> {
    state: Mutex<Option<Result<T>>>,
    condvar: Condvar,
}

/// A consumer-side handle to a submitted task's eventual outcome.
/// Independent of the pool: valid (and joinable) even after the pool
/// that ran the task has been dropped.
pub struct TaskHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task completes, yielding its return value, the
    /// panic it raised (as [`PoolError::TaskPanicked`]), or
    /// [`PoolError::HandleDropped`] if the task was discarded (for
    /// instance by [`crate::pool::ThreadPool::clear_tasks`]) before it
    /// ran.
    pub fn join(self) -> Result<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(result) = state.take() {
                return result;
            }
            self.shared.condvar.wait(&mut state);
        }
    }
}

/// Guards the producer side of a [`Shared`] slot: if dropped without
/// ever completing (the envelope was discarded from a queue rather than
/// invoked), it signals `HandleDropped` instead of leaving the handle
/// parked forever.
struct Producer<T> {
    shared: Arc<Shared<T>>,
    completed: bool,
}

impl<T> Producer<T> {
    fn complete(mut self, result: Result<T>) {
        *self.shared.state.lock() = Some(result);
        self.shared.condvar.notify_all();
        self.completed = true;
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        if !self.completed {
            let mut state = self.shared.state.lock();
            if state.is_none() {
                *state = Some(Err(PoolError::HandleDropped));
            }
            self.shared.condvar.notify_all();
        }
    }
}

/// Wrap `f` into a boxed task plus the handle that will receive its
/// result (or panic) once the task runs.
pub fn envelope<F, T>(f: F) -> (BoxedTask, TaskHandle<T>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let shared = Arc::new(Shared {
        state: Mutex::new(None),
        condvar: Condvar::new(),
    });
    let producer = Producer {
        shared: shared.clone(),
        completed: false,
    };

    let task: BoxedTask = Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(f))
            .map_err(|payload| PoolError::TaskPanicked(panic_message(payload)));
        producer.complete(result);
    });

    (task, TaskHandle { shared })
}

/// Wrap `f` into a boxed task with no handle. Panics are caught and
/// logged, never propagated, so a misbehaving task cannot take down its
/// worker.
pub fn detached<F>(f: F) -> BoxedTask
where
    F: FnOnce() + Send + 'static,
{
    Box::new(move || {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            tracing::error!(panic = %panic_message(payload), "detached task panicked");
        }
    })
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
