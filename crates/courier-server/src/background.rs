//! Fire-and-forget work started from request handlers.
//!
//! The webhook answers Telegram before the update is processed. Work spawned
//! here may be lost if the process exits first; nothing waits on it.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument};

/// Handle to a detached task. Dropping it does not cancel the task.
pub struct BackgroundTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn spawn<F>(name: &'static str, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = tracing::info_span!("background", task = name);
        let handle = tokio::spawn(work.instrument(span));
        debug!(task = name, "Spawned background task");
        Self { name, handle }
    }

    /// Wait for the task. Request handlers never do.
    #[cfg(test)]
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "Background task panicked or was cancelled");
        }
    }
}
