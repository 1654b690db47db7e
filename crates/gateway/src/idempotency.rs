//! Idempotency cache: binds an order's idempotency key to its computed
//! outcome for a bounded TTL, so at-least-once request delivery yields
//! at-most-once order effects.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use protocol::OrderResult;
use tracing::debug;

struct CacheEntry {
    result: OrderResult,
    expires_at: Instant,
}

pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(default_ttl_ms: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl: Duration::from_millis(default_ttl_ms),
        }
    }

    /// Fetch a cached outcome. An expired entry is evicted on read and
    /// reported as absent.
    pub fn get(&self, key: &str) -> Option<OrderResult> {
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Bind an outcome to a key with the default TTL. Overwrites any
    /// previous binding unconditionally.
    pub fn put(&self, key: &str, result: OrderResult) {
        self.put_with_ttl(key, result, self.default_ttl);
    }

    pub fn put_with_ttl(&self, key: &str, result: OrderResult, ttl: Duration) {
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        entries.insert(
            key.to_string(),
            CacheEntry {
                result,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop every expired entry. Called from a background task so memory
    /// stays bounded by the live key set.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "idempotency sweep");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("idempotency lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::OrderStatus;

    fn outcome(order_id: &str, key: &str) -> OrderResult {
        OrderResult::new(OrderStatus::Ack, order_id, key)
    }

    #[test]
    fn get_returns_cached_outcome() {
        let cache = IdempotencyCache::new(300_000);
        cache.put("K1", outcome("ORD_1", "K1"));
        let hit = cache.get("K1").unwrap();
        assert_eq!(hit.order_id, "ORD_1");
        assert_eq!(hit.echo_key, "K1");
        assert!(cache.get("K2").is_none());
    }

    #[test]
    fn put_overwrites_unconditionally() {
        let cache = IdempotencyCache::new(300_000);
        cache.put("K1", outcome("ORD_1", "K1"));
        cache.put("K1", outcome("ORD_2", "K1"));
        assert_eq!(cache.get("K1").unwrap().order_id, "ORD_2");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entry_evicted_on_read() {
        let cache = IdempotencyCache::new(300_000);
        cache.put_with_ttl("K1", outcome("ORD_1", "K1"), Duration::ZERO);
        assert!(cache.get("K1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = IdempotencyCache::new(300_000);
        cache.put_with_ttl("dead", outcome("ORD_1", "dead"), Duration::ZERO);
        cache.put("live", outcome("ORD_2", "live"));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("live").is_some());
    }
}
