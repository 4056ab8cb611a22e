//! Result memoization with TTL and bounded LRU capacity.
//!
//! Keys are a deterministic hash of (tool name, canonicalized arguments),
//! so identical calls map to the same entry regardless of argument order.
//! The store is sharded by key hash: a lock covers one shard, never the
//! whole cache, so concurrent calls to unrelated tools do not contend.
//! Expired entries are evicted lazily on lookup.

use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::{catalog::ToolName, error::InvocationResult};

const SHARDS: usize = 16;

pub type CacheKey = [u8; 32];

/// Deterministic key for (tool, arguments): object keys are sorted
/// recursively before hashing so equivalent mappings collide.
pub fn cache_key(tool: &ToolName, arguments: &Map<String, Value>) -> CacheKey {
    let canonical = canonicalize(&Value::Object(arguments.clone()));
    let mut hasher = blake3::Hasher::new();
    hasher.update(tool.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical.to_string().as_bytes());
    *hasher.finalize().as_bytes()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        value => value.clone(),
    }
}

struct CacheEntry {
    result: InvocationResult,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

pub struct ResultCache {
    shards: Vec<Mutex<LruCache<CacheKey, CacheEntry>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ResultCache {
    /// `capacity` is the total entry count, split across shards.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let per_shard = NonZeroUsize::new(capacity.div_ceil(SHARDS).max(1))
            .unwrap_or(NonZeroUsize::MIN);
        let shards = (0..SHARDS)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();
        Self {
            shards,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<LruCache<CacheKey, CacheEntry>> {
        &self.shards[key[0] as usize % SHARDS]
    }

    pub fn get(&self, key: &CacheKey) -> Option<InvocationResult> {
        let mut shard = self.shard(key).lock();

        let expired = matches!(shard.get(key), Some(entry) if entry.is_expired());
        if expired {
            shard.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match shard.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.result.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: CacheKey, result: InvocationResult) {
        self.put_with_ttl(key, result, self.ttl)
    }

    pub fn put_with_ttl(&self, key: CacheKey, result: InvocationResult, ttl: Duration) {
        let entry = CacheEntry {
            result,
            inserted_at: Instant::now(),
            ttl,
        };
        let evicted = self.shard(&key).lock().push(key, entry);
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: self.len(),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}
