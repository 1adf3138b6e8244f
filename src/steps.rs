use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use crate::error::Result;

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Boundary to the durable step-execution substrate.
///
/// `run_step` deduplicates by name: re-running after a resume must not
/// repeat the side effect, so callers key each unit of work with a
/// deterministic name (`run_id` + step + iteration). `wait_for_signal`
/// is the suspend primitive; `None` means the wait timed out.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step<'a>(&self, name: &str, work: StepFuture<'a>) -> Result<Value>;
    async fn wait_for_signal(&self, name: &str, timeout: Duration) -> Result<Option<Value>>;
    async fn signal(&self, name: &str, payload: Value) -> Result<()>;
}

/// Build the deterministic step key for one unit of work.
pub fn step_key(run_id: &str, step: &str, iteration: u32) -> String {
    format!("{run_id}:{step}:{iteration}")
}

/// In-process step runner with the same dedup/suspend semantics a
/// durable platform provides. Completed step results are memoized by
/// name; failed steps are not, so they stay retryable.
#[derive(Default)]
pub struct MemoryStepRunner {
    completed: Mutex<HashMap<String, Value>>,
    signals: Mutex<HashMap<String, Value>>,
    notify: Notify,
}

impl MemoryStepRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepRunner for MemoryStepRunner {
    async fn run_step<'a>(&self, name: &str, work: StepFuture<'a>) -> Result<Value> {
        if let Some(result) = self.completed.lock().await.get(name) {
            tracing::debug!(step = %name, "Step already completed, returning memoized result");
            return Ok(result.clone());
        }

        tracing::info!(step = %name, "Running step");
        let result = work.await?;

        self.completed
            .lock()
            .await
            .insert(name.to_string(), result.clone());
        Ok(result)
    }

    async fn wait_for_signal(&self, name: &str, timeout: Duration) -> Result<Option<Value>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Arm the notification before checking, so a signal landing
            // between the check and the wait is not lost.
            let notified = self.notify.notified();

            if let Some(payload) = self.signals.lock().await.remove(name) {
                return Ok(Some(payload));
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(signal = %name, "Wait for signal timed out");
                    return Ok(None);
                }
            }
        }
    }

    async fn signal(&self, name: &str, payload: Value) -> Result<()> {
        self.signals
            .lock()
            .await
            .insert(name.to_string(), payload);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_step_is_idempotent_by_name() {
        let runner = MemoryStepRunner::new();
        let count = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let count = Arc::clone(&count);
            let result = runner
                .run_step(
                    &step_key("run-1", "type_check", 0),
                    Box::pin(async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({"ok": true}))
                    }),
                )
                .await
                .unwrap();
            assert_eq!(result, json!({"ok": true}));
        }

        // Same key: the side effect ran once
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_iterations_run_separately() {
        let runner = MemoryStepRunner::new();
        let count = Arc::new(AtomicU32::new(0));

        for iteration in 0..2 {
            let count = Arc::clone(&count);
            runner
                .run_step(
                    &step_key("run-1", "type_check", iteration),
                    Box::pin(async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }),
                )
                .await
                .unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_step_is_not_memoized() {
        let runner = MemoryStepRunner::new();
        let count = Arc::new(AtomicU32::new(0));

        let failing_count = Arc::clone(&count);
        let err = runner
            .run_step(
                "run-1:flaky:0",
                Box::pin(async move {
                    failing_count.fetch_add(1, Ordering::SeqCst);
                    Err(crate::error::AppError::Step("boom".to_string()))
                }),
            )
            .await;
        assert!(err.is_err());

        let ok_count = Arc::clone(&count);
        runner
            .run_step(
                "run-1:flaky:0",
                Box::pin(async move {
                    ok_count.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }),
            )
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wait_times_out_with_none() {
        let runner = MemoryStepRunner::new();
        let result = runner
            .wait_for_signal("run-1:human:0", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_signal_delivered_to_waiter() {
        let runner = Arc::new(MemoryStepRunner::new());

        let waiter = Arc::clone(&runner);
        let handle = tokio::spawn(async move {
            waiter
                .wait_for_signal("run-1:human:0", Duration::from_secs(5))
                .await
                .unwrap()
        });

        // Give the waiter a moment to park
        tokio::time::sleep(Duration::from_millis(10)).await;
        runner
            .signal("run-1:human:0", json!({"status": "NEEDS_REQUIREMENTS"}))
            .await
            .unwrap();

        let payload = handle.await.unwrap();
        assert_eq!(payload, Some(json!({"status": "NEEDS_REQUIREMENTS"})));
    }

    #[tokio::test]
    async fn test_signal_before_wait_is_consumed_immediately() {
        let runner = MemoryStepRunner::new();
        runner.signal("k", json!(1)).await.unwrap();

        let payload = runner
            .wait_for_signal("k", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(payload, Some(json!(1)));

        // Consumed: a second wait times out
        let payload = runner
            .wait_for_signal("k", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(payload.is_none());
    }
}
