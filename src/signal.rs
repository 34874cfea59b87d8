//! A binary semaphore used to wake a parked worker.
//!
//! Built from a sticky `Mutex<bool>` + `Condvar` pair rather than a raw
//! condvar, so that `release` followed later by `acquire` is never lost:
//! the flag persists across the gap, unlike a plain "notify" which only
//! wakes threads already waiting.

use parking_lot::{Condvar, Mutex};

pub struct Signal {
    ready: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Park the calling thread until `release` has been (or is) called,
    /// then consume the notification.
    pub fn acquire(&self) {
        let mut ready = self.ready.lock();
        while !*ready {
            self.condvar.wait(&mut ready);
        }
        *ready = false;
    }

    /// Wake one waiter (or arm the next `acquire` if nobody is currently
    /// waiting).
    pub fn release(&self) {
        let mut ready = self.ready.lock();
        *ready = true;
        self.condvar.notify_one();
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// A level-triggered, waitable boolean. Used for `threads_complete`:
/// `wait_true` blocks until the flag is true, re-checking a caller
/// predicate on every wake to guard against spurious wakeups.
pub struct WaitableFlag {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl WaitableFlag {
    pub fn new(initial: bool) -> Self {
        Self {
            state: Mutex::new(initial),
            condvar: Condvar::new(),
        }
    }

    pub fn set(&self, value: bool) {
        let mut state = self.state.lock();
        *state = value;
        if value {
            self.condvar.notify_all();
        }
    }

    /// Block until the flag is true and `still_true` confirms the
    /// underlying condition still holds (guards against the flag having
    /// flipped back to false between the wakeup and the caller
    /// re-checking it).
    pub fn wait_true(&self, mut still_true: impl FnMut() -> bool) {
        let mut state = self.state.lock();
        loop {
            if *state && still_true() {
                return;
            }
            self.condvar.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn release_before_acquire_is_not_lost() {
        let signal = Signal::new();
        signal.release();
        signal.acquire(); // must not block
    }

    #[test]
    fn acquire_blocks_until_release() {
        let signal = Arc::new(Signal::new());
        let woken = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let s = signal.clone();
        let w = woken.clone();
        let handle = thread::spawn(move || {
            s.acquire();
            w.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!woken.load(std::sync::atomic::Ordering::SeqCst));
        signal.release();
        handle.join().unwrap();
        assert!(woken.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn waitable_flag_unblocks_on_set_true() {
        let flag = Arc::new(WaitableFlag::new(false));
        let f = flag.clone();
        let handle = thread::spawn(move || {
            f.wait_true(|| true);
        });
        thread::sleep(Duration::from_millis(20));
        flag.set(true);
        handle.join().unwrap();
    }
}
