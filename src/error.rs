//! Gateway error types.
//!
//! Defines error variants for catalog construction, policy gating, and tool
//! execution, plus the wire-facing [`Failure`] payload surfaced to callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Execution exceeded {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Transient upstream failure: {0}")]
    TransientUpstream(String),

    #[error("Upstream failure: {0}")]
    PermanentUpstream(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether retrying the same call may succeed.
    ///
    /// Only upstream network-class errors, timeouts, and upstream rate-limit
    /// signals qualify. The gateway's own rate limit is surfaced to the
    /// caller immediately, never retried internally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_) | GatewayError::TransientUpstream(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::ToolNotFound(_) | GatewayError::InvalidArguments(_) => {
                ErrorKind::InvalidArgument
            }
            GatewayError::PolicyDenied(_) => ErrorKind::PolicyDenied,
            GatewayError::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            GatewayError::Timeout(_) => ErrorKind::Timeout,
            GatewayError::RateLimitExceeded(_) => ErrorKind::RateLimited,
            GatewayError::TransientUpstream(_) => ErrorKind::TransientUpstream,
            GatewayError::PermanentUpstream(_) => ErrorKind::PermanentUpstream,
            GatewayError::Cancelled | GatewayError::Config(_) | GatewayError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Convert into the wire-facing failure shape, tagging the pipeline
    /// stage that produced it.
    pub fn into_failure(self, origin: Origin) -> Failure {
        let hint = self.default_hint();
        Failure {
            kind: self.kind(),
            message: self.to_string(),
            hint,
            origin,
        }
    }

    fn default_hint(&self) -> Option<String> {
        match self {
            GatewayError::ToolNotFound(_) => {
                Some("list available tools to see valid names".to_string())
            }
            GatewayError::PolicyDenied(_) => Some(
                "adjust allow/deny patterns or enable the dangerous-operations switch".to_string(),
            ),
            GatewayError::AuthenticationFailed(_) => {
                Some("configure credentials for this library family".to_string())
            }
            GatewayError::RateLimitExceeded(_) => Some("retry after the window elapses".to_string()),
            GatewayError::PermanentUpstream(_) => None,
            _ => None,
        }
    }
}

/// Failure classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    PolicyDenied,
    AuthenticationFailed,
    Timeout,
    RateLimited,
    TransientUpstream,
    PermanentUpstream,
    Internal,
}

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Policy,
    Auth,
    Execution,
    Pagination,
}

/// Wire-facing failure payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub origin: Origin,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>, origin: Origin) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
            origin,
        }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationResult {
    Success {
        value: Value,
        #[serde(default)]
        pages_fetched: u32,
        #[serde(default)]
        truncated: bool,
    },
    Failure {
        #[serde(flatten)]
        failure: Failure,
    },
}

impl InvocationResult {
    pub fn success(value: Value) -> Self {
        InvocationResult::Success {
            value,
            pages_fetched: 1,
            truncated: false,
        }
    }

    pub fn failure(failure: Failure) -> Self {
        InvocationResult::Failure { failure }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success { .. })
    }

    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            InvocationResult::Failure { failure } => Some(failure),
            InvocationResult::Success { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            InvocationResult::Success { value, .. } => Some(value),
            InvocationResult::Failure { .. } => None,
        }
    }
}
