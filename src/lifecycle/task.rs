//! Ownership of spawned background tasks.

use std::sync::Mutex;
use tokio::task::JoinHandle;

/// Holds at most one running background task.
///
/// Installing a new task aborts the one it replaces. Dropping the slot aborts
/// whatever is still running, so timers never outlive their owner.
#[derive(Debug, Default)]
pub struct TaskSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle`, aborting any task already in the slot.
    pub fn replace(&self, handle: JoinHandle<()>) {
        let previous = self.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Abort the current task. Returns `true` if one was still running.
    pub fn cancel(&self) -> bool {
        match self.lock().take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    /// Whether a task is installed and has not yet finished.
    pub fn is_active(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        // A poisoned slot still holds a valid handle.
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.lock().take() {
            handle.abort();
        }
    }
}
