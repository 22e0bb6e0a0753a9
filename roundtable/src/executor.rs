//! Opaque worker execution
//!
//! [`WorkerExecutor`] is the single-method seam every worker implementation
//! (local, remote, simulated) satisfies. [`invoke`] wraps one call: it
//! applies the optional time box and folds errors and timeouts into a
//! failed [`TaskResult`] so callers never see a raised executor error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::types::{TaskRequest, TaskResult};

/// An opaque unit of execution bound to a worker at registration.
///
/// Implementations may fail arbitrarily and are untrusted for both latency
/// and correctness.
#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    async fn execute(&self, content: &str) -> anyhow::Result<String>;
}

/// Shared executor handle
pub type SharedExecutor = Arc<dyn WorkerExecutor>;

/// Adapts a synchronous closure into a [`WorkerExecutor`]
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> WorkerExecutor for FnExecutor<F>
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    async fn execute(&self, content: &str) -> anyhow::Result<String> {
        (self.f)(content)
    }
}

/// Run `task` on `executor`, never propagating the executor's failure.
///
/// A `timeout` of `None` lets the call run to completion. On expiry the
/// call future is dropped (best-effort abandonment).
pub async fn invoke(
    executor: &dyn WorkerExecutor,
    task: &TaskRequest,
    worker_id: &str,
    timeout: Option<Duration>,
) -> TaskResult {
    let start = Instant::now();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, executor.execute(&task.content)).await {
            Ok(result) => result.map_err(|e| ExecutionError::Raised(format!("{e:#}"))),
            Err(_) => Err(ExecutionError::TimedOut(limit)),
        },
        None => executor
            .execute(&task.content)
            .await
            .map_err(|e| ExecutionError::Raised(format!("{e:#}"))),
    };

    let elapsed = start.elapsed();
    let result = match outcome {
        Ok(output) => {
            debug!(
                task_id = task.id,
                worker_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Worker completed"
            );
            TaskResult::succeeded(task.id, worker_id.to_string(), output, elapsed)
        }
        Err(e) => {
            warn!(task_id = task.id, worker_id, error = %e, "Worker call failed");
            let timed_out = matches!(e, ExecutionError::TimedOut(_));
            TaskResult::failed(task.id, worker_id.to_string(), e.to_string(), elapsed)
                .with_metadata("timed_out", timed_out)
        }
    };

    result.with_metadata("priority", task.priority.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sleepy(Duration);

    #[async_trait]
    impl WorkerExecutor for Sleepy {
        async fn execute(&self, _content: &str) -> anyhow::Result<String> {
            tokio::time::sleep(self.0).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let exec = FnExecutor::new(|c: &str| Ok(c.to_uppercase()));
        let task = TaskRequest::new("hello");
        let result = invoke(&exec, &task, "w1", None).await;

        assert!(result.success);
        assert_eq!(result.output, "HELLO");
        assert_eq!(result.worker_id, "w1");
        assert_eq!(result.task_id, task.id);
        assert_eq!(result.metadata["priority"], "normal");
    }

    #[tokio::test]
    async fn test_invoke_error_becomes_failed_result() {
        let exec = FnExecutor::new(|_: &str| anyhow::bail!("model exploded"));
        let task = TaskRequest::new("hello");
        let result = invoke(&exec, &task, "w1", None).await;

        assert!(!result.success);
        assert!(result.output.is_empty());
        assert!(result.error.as_deref().unwrap().contains("model exploded"));
        assert_eq!(result.metadata["timed_out"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_timeout_becomes_failed_result() {
        let exec = Sleepy(Duration::from_secs(60));
        let task = TaskRequest::new("hello");
        let result = invoke(&exec, &task, "w1", Some(Duration::from_secs(1))).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(result.metadata["timed_out"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_within_timeout() {
        let exec = Sleepy(Duration::from_millis(10));
        let task = TaskRequest::new("hello");
        let result = invoke(&exec, &task, "w1", Some(Duration::from_secs(1))).await;
        assert!(result.success);
        assert_eq!(result.output, "late");
    }
}
