use crate::sandbox::ExecutionResult;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifetime of a fresh entry, and the increment added on every hit.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_PRUNE_BATCH: usize = 10;

/// Content-derived identity of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Digest of every input that can change what a run prints. Fields are
    /// length-prefixed so adjacent fields cannot bleed into each other.
    pub fn derive(
        escaped_args: &str,
        entry: &str,
        code: &[u8],
        escaped_stdin: &str,
        env: &BTreeMap<String, String>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        for field in [escaped_args.as_bytes(), entry.as_bytes(), code, escaped_stdin.as_bytes()] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        hasher.update(&(env.len() as u64).to_le_bytes());
        for (k, v) in env {
            hasher.update(&(k.len() as u64).to_le_bytes());
            hasher.update(k.as_bytes());
            hasher.update(&(v.len() as u64).to_le_bytes());
            hasher.update(v.as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
struct CacheEntry {
    result: Arc<ExecutionResult>,
    expires_at: Instant,
}

/// Bounded LRU store of execution results with sliding expiry.
pub struct ResultCache {
    store: Mutex<LruCache<CacheKey, CacheEntry>>,
    capacity: usize,
    prune_batch: usize,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, DEFAULT_PRUNE_BATCH, DEFAULT_TTL)
    }

    pub fn with_policy(capacity: usize, prune_batch: usize, ttl: Duration) -> Self {
        Self {
            store: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
            prune_batch: prune_batch.max(1),
            ttl,
        }
    }

    /// Live entry for `key`. Expired entries are dropped on sight.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ExecutionResult>> {
        let mut store = self.store.lock();
        let expired = match store.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(Arc::clone(&entry.result));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            store.pop(key);
        }
        None
    }

    /// Store `result` with a full TTL, pruning a batch of least recently used
    /// entries once capacity is exceeded.
    pub fn insert(&self, key: CacheKey, result: Arc<ExecutionResult>) {
        let mut store = self.store.lock();
        store.put(
            key,
            CacheEntry {
                result,
                expires_at: Instant::now() + self.ttl,
            },
        );
        if store.len() > self.capacity {
            let mut pruned = 0;
            while pruned < self.prune_batch && store.len() > 1 {
                if store.pop_lru().is_none() {
                    break;
                }
                pruned += 1;
            }
            tracing::debug!(pruned, remaining = store.len(), "Pruned result cache");
        }
    }

    /// Push the expiry of an existing entry out by one TTL increment. The
    /// stored value is left untouched.
    pub fn extend(&self, key: &CacheKey) -> bool {
        let mut store = self.store.lock();
        match store.peek_mut(key) {
            Some(entry) => {
                entry.expires_at = entry
                    .expires_at
                    .checked_add(self.ttl)
                    .unwrap_or(entry.expires_at);
                true
            }
            None => false,
        }
    }

    pub fn expires_at(&self, key: &CacheKey) -> Option<Instant> {
        self.store.lock().peek(key).map(|e| e.expires_at)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.store.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
