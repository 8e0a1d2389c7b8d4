//! Arena of cancellable scheduled tasks
//!
//! Startup-delay flips, allocation releases and heartbeats register
//! here so shutdown can abort everything still outstanding.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct Timers {
    handles: Arc<Mutex<Vec<AbortHandle>>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, unless cancelled first
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }

    /// Track an arbitrary background future
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut).abort_handle();
        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tasks that have not finished yet
    pub fn pending(&self) -> usize {
        self.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Abort every outstanding task
    pub fn cancel_all(&self) {
        let handles: Vec<AbortHandle> = self.lock().drain(..).collect();
        let outstanding = handles.iter().filter(|h| !h.is_finished()).count();
        for handle in handles {
            handle.abort();
        }
        debug!(outstanding = outstanding, "Cancelled scheduled tasks");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AbortHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
