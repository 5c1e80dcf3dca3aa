//! Registry for detached notification tasks.
//!
//! Notification handlers run outside the request/response cycle: the
//! dispatcher spawns them here and replies immediately. Tests and graceful
//! shutdown use [`TaskRegistry::drain`] to wait for everything spawned so
//! far to finish.

use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
pub struct TaskRegistry {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a detached task and keep its handle for [`drain`](Self::drain).
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Wait for every spawned task, including tasks spawned while draining.
    pub async fn drain(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> = {
                let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *handles)
            };
            if batch.is_empty() {
                return;
            }
            debug!(count = batch.len(), "draining notification tasks");
            for handle in batch {
                // a panicked notification task was already logged by its own
                // interception; nothing left to surface here
                let _ = handle.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_drain_waits_for_spawned_tasks() {
        let registry = TaskRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            registry.spawn(async move {
                tokio::task::yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.drain().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_drain_on_empty_registry_returns() {
        let registry = TaskRegistry::new();
        registry.drain().await;
    }
}
