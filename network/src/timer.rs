//! Cancellable one-shot timers for peers.
//!
//! A timer owns a spawned tokio task; cancelling (or dropping) the timer
//! aborts the task. Callbacks capture only a `Weak` peer handle and upgrade
//! it when they fire.

use std::time::Duration;

use tokio::task::AbortHandle;

#[derive(Default)]
pub struct PeerTimer {
    handle: Option<AbortHandle>,
}

impl PeerTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` after `delay`, replacing any pending callback.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
        self.handle = Some(task.abort_handle());
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PeerTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
