//! Start barrier and cancellation flag shared by the workers of one plan

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Closed,
    Open,
    Aborted,
}

/// Holds spawned workers until the whole set exists
///
/// Workers call [`StartGate::wait`] before touching any resource. The pool
/// opens the gate once every worker has been spawned, or aborts it when a
/// spawn fails so that already started workers leave without doing work.
#[derive(Debug, Clone)]
pub struct StartGate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StartGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(GateState::Closed), Condvar::new())),
        }
    }

    /// Let every waiting worker proceed
    pub fn open(&self) {
        self.settle(GateState::Open);
    }

    /// Release waiting workers with the instruction to stop
    pub fn abort(&self) {
        self.settle(GateState::Aborted);
    }

    fn settle(&self, state: GateState) {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        if *guard == GateState::Closed {
            *guard = state;
        }
        cvar.notify_all();
    }

    /// Block until the gate settles; `true` means the worker may run
    pub fn wait(&self) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        while *guard == GateState::Closed {
            guard = cvar.wait(guard).unwrap_or_else(|p| p.into_inner());
        }
        *guard == GateState::Open
    }
}
