//! Per-tool rate limiting with token buckets.
//!
//! Each tool gets its own bucket inside a concurrent map, so acquiring a
//! token for one tool never contends with another. Tokens refill
//! continuously at `capacity / window`; the count never goes negative and
//! never exceeds capacity.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    catalog::ToolName,
    error::{GatewayError, GatewayResult},
};

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / window.as_secs_f64().max(f64::MIN_POSITIVE),
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .clamp(0.0, self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    fn put_back(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }
}

/// Snapshot of rate limiter counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RateLimitStats {
    pub tracked_tools: usize,
    pub total_blocked: u64,
}

pub struct RateLimiter {
    buckets: DashMap<ToolName, TokenBucket>,
    capacity: u32,
    window: Duration,
    blocked: AtomicU64,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            window,
            blocked: AtomicU64::new(0),
        }
    }

    /// Consume one token for the tool, or fail with `RateLimitExceeded`
    /// without touching the underlying callable.
    pub fn try_acquire(&self, tool: &ToolName) -> GatewayResult<()> {
        let mut bucket = self
            .buckets
            .entry(tool.clone())
            .or_insert_with(|| TokenBucket::new(self.capacity, self.window));

        match bucket.try_take(Instant::now()) {
            Ok(()) => Ok(()),
            Err(retry_after) => {
                self.blocked.fetch_add(1, Ordering::Relaxed);
                Err(GatewayError::RateLimitExceeded(format!(
                    "tool '{}' exhausted {} calls per {:?}; retry in {:.1}s",
                    tool,
                    self.capacity,
                    self.window,
                    retry_after.as_secs_f64()
                )))
            }
        }
    }

    /// Return a token taken by a call that never ran (e.g. the request was
    /// cancelled before execution).
    pub fn refund(&self, tool: &ToolName) {
        if let Some(mut bucket) = self.buckets.get_mut(tool) {
            bucket.put_back();
        }
    }

    pub fn remaining(&self, tool: &ToolName) -> u32 {
        match self.buckets.get_mut(tool) {
            Some(mut bucket) => {
                bucket.refill(Instant::now());
                bucket.tokens.floor() as u32
            }
            None => self.capacity,
        }
    }

    pub fn reset(&self) {
        self.buckets.clear();
        self.blocked.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            tracked_tools: self.buckets.len(),
            total_blocked: self.blocked.load(Ordering::Relaxed),
        }
    }
}
