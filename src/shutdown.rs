//! Process-wide shutdown signal
//!
//! One [`Shutdown`] is shared by the blocking worker threads (listener,
//! relay bridge) and the async HTTP servers. Triggering it wakes every
//! sleeper at once.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    triggered: Mutex<bool>,
    cvar: Condvar,
    notify: Notify,
}

/// Cloneable handle to one shutdown signal
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.inner
            .triggered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Request shutdown and wake every waiter. Idempotent.
    pub fn trigger(&self) {
        *self.state() = true;
        self.inner.cvar.notify_all();
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        *self.state()
    }

    /// Block the current thread for `total` or until shutdown, whichever
    /// comes first. Returns `true` if shutdown was requested.
    pub fn sleep(&self, total: Duration) -> bool {
        let guard = self.state();
        let (guard, _) = self
            .inner
            .cvar
            .wait_timeout_while(guard, total, |triggered| !*triggered)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }

    /// Resolve once shutdown is requested
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}
