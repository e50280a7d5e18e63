use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Holds at most one live background task.
///
/// `replace` aborts whatever is still pending and spawns the new future. The
/// new body only starts once the previous one has actually stopped, so two
/// bodies from the same slot never overlap even on a multi-threaded runtime.
pub struct TaskSlot {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Cancel the pending task (if any) and start `fut` in its place.
    /// Must be called from within a tokio runtime. Returns immediately.
    pub fn replace<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let gate = Arc::clone(&self.gate);
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(previous) = handle.take() {
            if !previous.is_finished() {
                log::trace!("[TASK] {}: cancelling pending task", self.name);
            }
            previous.abort();
        }

        *handle = Some(tokio::spawn(async move {
            // An aborted predecessor releases the gate when it is dropped.
            let _running = gate.lock_owned().await;
            fut.await;
        }));
    }

    /// Abort the pending task without starting a new one
    pub fn cancel(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = handle.take() {
            previous.abort();
        }
    }

    /// True while a task started through this slot has not finished
    pub fn is_pending(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
