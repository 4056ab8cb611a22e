//! Gateway configuration surface.
//!
//! Plain serde data with sensible defaults; how the values are loaded
//! (environment, flags, files) is the host's concern. Helpers are provided
//! for parsing YAML or JSON content handed in by the host.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Permit mutating/destructive tools to execute for real.
    pub allow_dangerous: bool,
    /// Report dangerous calls instead of executing them.
    pub dry_run: bool,
    pub allow_patterns: Vec<String>,
    pub deny_patterns: Vec<String>,
    pub redact_secrets: bool,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub pagination: PaginationConfig,
    pub enrichment: EnrichmentConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allow_dangerous: false,
            dry_run: false,
            allow_patterns: Vec::new(),
            deny_patterns: Vec::new(),
            redact_secrets: true,
            timeout_secs: 30,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pagination: PaginationConfig::default(),
            enrichment: EnrichmentConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("invalid YAML config: {}", e)))
    }

    pub fn from_json_str(content: &str) -> GatewayResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| GatewayError::Config(format!("invalid JSON config: {}", e)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_secs: f64,
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_secs: 2.0,
            max_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 300,
            capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub capacity: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 100,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub max_items: usize,
    pub auto_collect: bool,
    pub page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_items: 100,
            auto_collect: false,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: 2000,
        }
    }
}
