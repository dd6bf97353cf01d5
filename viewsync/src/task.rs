//! Cancellable scheduled work.
//!
//! Every timer the engine runs (debounce flushes, echo window, heartbeat,
//! persistence, pause fallback) is a tokio task behind a [`ScheduledTask`].
//! Cancelling is explicit; dropping the handle detaches the task so a task
//! may clear its own slot without aborting itself.

use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `fut` on `runtime` right away.
    pub fn spawn<F>(runtime: &Handle, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: runtime.spawn(fut),
        }
    }

    /// Run `f` once after `delay`.
    pub fn after<F>(runtime: &Handle, delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(runtime, async move {
            tokio::time::sleep(delay).await;
            f();
        })
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Cancel whatever task occupies `slot` and leave it empty.
pub fn cancel_slot(slot: &mut Option<ScheduledTask>) {
    if let Some(task) = slot.take() {
        task.cancel();
    }
}
