use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::controller::Controller;
use crate::error::{AppError, Result};

/// Tracks the one live task per run.
///
/// Each run executes as a single sequential tokio task; concurrency
/// exists only across runs, which share no mutable state beyond the
/// store. The registry rejects a second concurrent task for the same
/// `run_id` and drives cooperative cancellation at shutdown.
pub struct RunRegistry {
    active: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_active(&self, run_id: &str) -> bool {
        self.active.lock().await.contains_key(run_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Spawn the controller loop for a run. Fails if the run is already
    /// executing.
    pub async fn spawn(
        registry: &Arc<RunRegistry>,
        run_id: &str,
        controller: Arc<Controller>,
    ) -> Result<()> {
        let cancel = Arc::new(AtomicBool::new(false));

        {
            let mut active = registry.active.lock().await;
            if active.contains_key(run_id) {
                return Err(AppError::Internal(format!(
                    "Run {run_id} is already executing"
                )));
            }
            active.insert(run_id.to_string(), Arc::clone(&cancel));
        }

        let registry = Arc::clone(registry);
        let run_id = run_id.to_string();

        tokio::spawn(async move {
            tracing::info!(run_id = %run_id, "Run task started");

            match controller.run(&run_id, cancel).await {
                Ok(state) => {
                    tracing::info!(run_id = %run_id, status = %state.status, "Run task finished");
                }
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "Run task failed");
                }
            }

            registry.active.lock().await.remove(&run_id);
        });

        Ok(())
    }

    /// Cooperative shutdown: flag every live run as cancelled and wait
    /// for the tasks to park themselves, up to `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        let count = {
            let active = self.active.lock().await;
            for (run_id, cancel) in active.iter() {
                tracing::info!(run_id = %run_id, "Cancelling in-flight run");
                cancel.store(true, Ordering::SeqCst);
            }
            active.len()
        };

        if count == 0 {
            return;
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.active.lock().await.is_empty() {
                tracing::info!("All runs drained");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tracing::warn!(
            remaining = self.active.lock().await.len(),
            "Shutdown grace period expired with runs still in flight"
        );
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}
