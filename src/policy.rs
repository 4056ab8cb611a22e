//! Policy gate for tool execution decisions.
//!
//! Decides ALLOW / DENY / DRY_RUN per tool from configurable shell-glob
//! patterns, the dangerous-operations switch, and the dry-run switch. The
//! decision is pure and evaluated before any auth, cache, or execution
//! work.

use regex::Regex;
use serde::Serialize;

use crate::{
    catalog::ToolDescriptor,
    error::{GatewayError, GatewayResult},
};

/// Result of a gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Allow,
    DryRun,
    Deny { reason: String },
}

impl GateDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        GateDecision::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }

    /// Allowed or dry-run tools are discoverable; denied tools are not.
    pub fn is_visible(&self) -> bool {
        !matches!(self, GateDecision::Deny { .. })
    }
}

/// Shell-glob pattern (`*`, `?`) matched against the full dotted name,
/// case-sensitively, compiled once to an anchored regex.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn compile(pattern: &str) -> GatewayResult<Self> {
        let mut regex = String::with_capacity(pattern.len() + 8);
        regex.push('^');
        for c in pattern.chars() {
            match c {
                '*' => regex.push_str(".*"),
                '?' => regex.push('.'),
                c => regex.push_str(&regex::escape(&c.to_string())),
            }
        }
        regex.push('$');
        let regex = Regex::new(&regex)
            .map_err(|e| GatewayError::Config(format!("invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Split a comma-separated pattern string, dropping empty entries.
pub fn parse_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct PolicyGate {
    allow: Vec<GlobPattern>,
    deny: Vec<GlobPattern>,
    allow_dangerous: bool,
    dry_run: bool,
}

impl PolicyGate {
    pub fn new(
        allow_patterns: &[String],
        deny_patterns: &[String],
        allow_dangerous: bool,
        dry_run: bool,
    ) -> GatewayResult<Self> {
        let allow = allow_patterns
            .iter()
            .map(|p| GlobPattern::compile(p))
            .collect::<GatewayResult<Vec<_>>>()?;
        let deny = deny_patterns
            .iter()
            .map(|p| GlobPattern::compile(p))
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(Self {
            allow,
            deny,
            allow_dangerous,
            dry_run,
        })
    }

    /// Evaluate the gate for one tool.
    ///
    /// Precedence: deny patterns, then allow-list membership, then the
    /// dangerous-operations switch (with dry-run as the fallback for
    /// dangerous tools).
    pub fn evaluate(&self, descriptor: &ToolDescriptor) -> GateDecision {
        let name = descriptor.name.as_str();

        if let Some(pattern) = self.deny.iter().find(|p| p.matches(name)) {
            return GateDecision::deny(format!(
                "'{}' matches deny pattern '{}'",
                name,
                pattern.as_str()
            ));
        }

        if !self.allow.is_empty() && !self.allow.iter().any(|p| p.matches(name)) {
            return GateDecision::deny(format!("'{}' matches no allow pattern", name));
        }

        if descriptor.risk.is_dangerous() && !self.allow_dangerous {
            if self.dry_run {
                return GateDecision::DryRun;
            }
            return GateDecision::deny(format!(
                "'{}' is classified {:?} and dangerous operations are disabled",
                name, descriptor.risk
            ));
        }

        GateDecision::Allow
    }
}
