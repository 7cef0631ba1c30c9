//! Per-stage retry execution with bounded backoff and timeouts.
//!
//! Every collaborator call runs under a timeout; no external call may block
//! the pipeline indefinitely. Transient failures are retried within the
//! stage's fixed budget (2 attempts, base delay 2s, multiplier 2.0 by
//! default); permanent failures return immediately. Exhausting the budget
//! returns the last error to the orchestrator, which converts it into the
//! stage's terminal failure state plus an operator alert.

use std::future::Future;
use std::time::Duration;

use triage::{PipelineConfig, StageError, StageKind};

/// Retry budget and timeout derived from the config snapshot.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub stage_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            base_delay: Duration::from_secs(config.retry.base_delay_secs),
            multiplier: config.retry.multiplier,
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
        }
    }

    /// Delay before the retry following `attempt` (1-based).
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor)
    }
}

/// Run a stage operation under the policy. The closure is invoked once per
/// attempt; a per-attempt timeout counts as a transient failure.
pub async fn run_stage<T, F, Fut>(
    policy: &RetryPolicy,
    stage: StageKind,
    mut op: F,
) -> Result<T, StageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        let result = match tokio::time::timeout(policy.stage_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(StageError::transient(
                stage,
                format!("call exceeded {:?} timeout", policy.stage_timeout),
            )),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    stage = %stage,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "transient stage failure"
                );
                last_error = Some(e);
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| StageError::transient(stage, "retry budget exhausted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            stage_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = run_stage(&policy(), StageKind::Retrieval, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StageError>(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = run_stage(&policy(), StageKind::Generation, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StageError::transient(StageKind::Generation, "throttled"))
                } else {
                    Ok("draft".to_string())
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "draft");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> =
            run_stage(&policy(), StageKind::Classification, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(StageError::transient(
                        StageKind::Classification,
                        "still down",
                    ))
                }
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("still down"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_skips_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = run_stage(&policy(), StageKind::Attachments, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StageError::permanent(
                    StageKind::Attachments,
                    "unreadable attachment",
                ))
            }
        })
        .await;
        assert!(!result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_timeout_counts_as_transient() {
        let mut short = policy();
        short.stage_timeout = Duration::from_millis(10);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = run_stage(&short, StageKind::Retrieval, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timeout"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_schedule() {
        let p = policy();
        assert_eq!(p.delay_after(1), Duration::from_secs(2));
        assert_eq!(p.delay_after(2), Duration::from_secs(4));
        assert_eq!(p.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn test_from_config_uses_defaults() {
        let p = RetryPolicy::from_config(&PipelineConfig::default());
        assert_eq!(p.max_attempts, 2);
        assert_eq!(p.base_delay, Duration::from_secs(2));
        assert_eq!(p.multiplier, 2.0);
        assert_eq!(p.stage_timeout, Duration::from_secs(30));
    }
}
