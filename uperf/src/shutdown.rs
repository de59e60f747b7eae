//! Process-level cancellation.
//!
//! Two phases: a shutdown is first *requested* (QUIT_ALL, exit from the
//! console), which lets loops wind down, and then *terminated*, which runs
//! the registered hooks. Hooks close the transport so that every call still
//! in flight fails at once.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Running,
    Requested,
    Terminated,
}

type Hook = Box<dyn FnOnce() + Send>;

struct State {
    phase: Phase,
    hooks: Vec<Hook>,
}

struct Inner {
    state: Mutex<State>,
    cond: Condvar,
}

/// Cloneable handle to the process's shutdown state.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("phase", &self.lock().phase)
            .finish()
    }
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    phase: Phase::Running,
                    hooks: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a hook run once on [`Shutdown::terminate`]. If termination
    /// already happened the hook runs immediately.
    pub fn on_terminate<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.phase == Phase::Terminated {
            drop(state);
            hook();
        } else {
            state.hooks.push(Box::new(hook));
        }
    }

    pub fn request(&self) {
        let mut state = self.lock();
        if state.phase == Phase::Running {
            debug!("shutdown requested");
            state.phase = Phase::Requested;
            self.inner.cond.notify_all();
        }
    }

    pub fn terminate(&self) {
        let hooks = {
            let mut state = self.lock();
            if state.phase == Phase::Terminated {
                return;
            }
            debug!("shutdown terminating");
            state.phase = Phase::Terminated;
            self.inner.cond.notify_all();
            std::mem::take(&mut state.hooks)
        };
        for hook in hooks {
            hook();
        }
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.lock().phase >= Phase::Requested
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.lock().phase == Phase::Terminated
    }

    /// Sleeps for `timeout` unless a shutdown is requested first.
    /// Returns whether a shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.phase == Phase::Running {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .inner
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Blocks until a shutdown is requested.
    pub fn wait_requested(&self) {
        let mut state = self.lock();
        while state.phase == Phase::Running {
            state = self
                .inner
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use super::*;

    #[test]
    fn test_phases() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_requested());

        shutdown.request();
        assert!(shutdown.is_requested());
        assert!(!shutdown.is_terminated());

        shutdown.terminate();
        assert!(shutdown.is_requested());
        assert!(shutdown.is_terminated());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert!(!shutdown.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_request_wakes_waiters() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            thread::spawn(move || shutdown.wait_timeout(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        shutdown.request();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_hooks_run_once() {
        let shutdown = Shutdown::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        shutdown.on_terminate(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        shutdown.terminate();
        shutdown.terminate();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let c = calls.clone();
        shutdown.on_terminate(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
