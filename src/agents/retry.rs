//! Orchestrator-side timeout and retry around agent calls.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient. Exponential backoff
//! (`backoff_ms * 2^(attempt-1)`) spaces re-invocations out: with a 500 ms
//! base and 3 retries the wait sequence is 500 ms → 1 s → 2 s. Errors flagged
//! non-retryable (bad credentials, malformed output) stop immediately.

use std::future::Future;
use tokio::time::{sleep, timeout, Duration};
use tracing::warn;

use crate::config::PipelineConfig;
use crate::error::{AgentError, AgentRole};

/// Timeout and retry budget for one agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.agent_max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.agent_timeout_secs),
        }
    }

    /// No retries; a single attempt with the same timeout.
    pub fn once(self) -> Self {
        Self {
            max_retries: 0,
            ..self
        }
    }
}

/// Invoke `op` under `policy`, retrying retryable failures.
///
/// Each attempt is bounded by `policy.timeout`; an elapsed timeout counts as
/// a retryable [`AgentError`].
pub async fn invoke<T, F, Fut>(policy: &RetryPolicy, role: AgentRole, mut op: F) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            let backoff = policy.backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "{} agent: retry {}/{} after {}ms",
                role, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let result = match timeout(policy.timeout, op()).await {
            Ok(r) => r,
            Err(_) => Err(AgentError::timeout(role, policy.timeout.as_secs())),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.retryable && attempt < policy.max_retries => {
                warn!("{} agent: attempt {} failed: {}", role, attempt + 1, e.message);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
