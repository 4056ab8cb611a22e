//! Execution engine: drives one underlying callable per attempt under a
//! timeout, retrying transient failures with capped exponential backoff.
//!
//! Synchronous and suspendable callables follow the same contract: every
//! attempt runs on its own task, so a timed-out blocking callable is
//! abandoned without holding up the response path, and an async callable
//! is cancelled cooperatively via task abort.

use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    auth::CredentialHandle,
    catalog::ToolDescriptor,
    error::{GatewayError, GatewayResult},
    metrics::GatewayMetrics,
    sdk::{CallArgs, CallError},
};

/// Backoff schedule: `base^attempt` seconds (attempt from 0), capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_secs: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_secs: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self
            .base_secs
            .powi(attempt.min(i32::MAX as u32) as i32)
            .min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Synthetic payload for a dry-run decision: describes the call that would
/// have been made without performing it.
pub fn describe_call(descriptor: &ToolDescriptor, args: &CallArgs) -> Value {
    json!({
        "dry_run": true,
        "message": format!("would have called {}", descriptor.name),
        "arguments": args,
        "note": "no operation was performed",
    })
}

pub struct ExecutionEngine {
    timeout: Duration,
    retry: RetryPolicy,
    metrics: Arc<GatewayMetrics>,
}

impl ExecutionEngine {
    pub fn new(timeout: Duration, retry: RetryPolicy, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            timeout,
            retry,
            metrics,
        }
    }

    /// Invoke the descriptor's binding with already-coerced arguments.
    ///
    /// Exactly one real invocation happens per attempt. Transient failures
    /// are retried up to the policy's maximum attempts; once exhausted,
    /// upstream transients are reclassified as permanent for the caller.
    /// Timeouts keep their own kind.
    pub async fn execute(
        &self,
        descriptor: &ToolDescriptor,
        args: CallArgs,
        credential: Option<CredentialHandle>,
        cancel: &CancellationToken,
    ) -> GatewayResult<Value> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .attempt_once(descriptor, args.clone(), credential.clone(), cancel)
                .await
            {
                Ok(value) => return Ok(value),
                Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        tool = %descriptor.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    self.metrics.record_retry();
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(GatewayError::TransientUpstream(message)) => {
                    return Err(GatewayError::PermanentUpstream(format!(
                        "{} (retries exhausted after {} attempts)",
                        message,
                        attempt + 1
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_once(
        &self,
        descriptor: &ToolDescriptor,
        args: CallArgs,
        credential: Option<CredentialHandle>,
        cancel: &CancellationToken,
    ) -> GatewayResult<Value> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        let binding = Arc::clone(descriptor.binding());
        let mut handle = tokio::spawn(async move { binding.invoke(args, credential).await });

        tokio::select! {
            _ = cancel.cancelled() => {
                handle.abort();
                Err(GatewayError::Cancelled)
            }
            outcome = tokio::time::timeout(self.timeout, &mut handle) => match outcome {
                Err(_) => {
                    // Abandon the in-flight work; blocking callables finish
                    // on their own thread without blocking this response.
                    handle.abort();
                    self.metrics.record_timeout();
                    Err(GatewayError::Timeout(self.timeout))
                }
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(call_error))) => Err(classify(call_error)),
                Ok(Err(join_error)) if join_error.is_panic() => Err(GatewayError::Internal(
                    format!("callable panicked: {}", join_error),
                )),
                Ok(Err(_)) => Err(GatewayError::Cancelled),
            }
        }
    }
}

fn classify(error: CallError) -> GatewayError {
    match error {
        CallError::Network(m) | CallError::RateLimited(m) | CallError::Unavailable(m) => {
            GatewayError::TransientUpstream(m)
        }
        CallError::Auth(m) => GatewayError::AuthenticationFailed(m),
        CallError::InvalidInput(m) => GatewayError::InvalidArguments(m),
        CallError::NotFound(m) => GatewayError::PermanentUpstream(format!("not found: {}", m)),
        CallError::Other(m) => GatewayError::PermanentUpstream(m),
    }
}
