//! Idempotency keys and the suppression cache
//!
//! The key is a digest of connector, product, user, and day bucket, so the
//! same person re-confirming the same product on the same day maps onto one
//! key. A fresh success within the window is returned verbatim; any sighting
//! within the window feeds the duplicate-request risk factor.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use mandi_core::types::PurchaseResult;

/// Deterministic digest of (connector, product, user, day bucket).
pub fn idempotency_key(
    connector_id: &str,
    external_id: &str,
    user_id: &str,
    day_bucket: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(connector_id.as_bytes());
    hasher.update(b"|");
    hasher.update(external_id.as_bytes());
    hasher.update(b"|");
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(day_bucket.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Entry {
    last_seen: Instant,
    success: Option<PurchaseResult>,
}

/// In-process idempotency window.
pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, Entry>>,
    window: Duration,
}

impl IdempotencyCache {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Whether this key was seen within the window (success or not).
    pub fn seen_recently(&self, key: &str) -> bool {
        let guard = self.entries.lock().expect("idempotency lock");
        guard
            .get(key)
            .map(|e| e.last_seen.elapsed() <= self.window)
            .unwrap_or(false)
    }

    /// A still-fresh successful result for this key, if any.
    pub fn fresh_success(&self, key: &str) -> Option<PurchaseResult> {
        let guard = self.entries.lock().expect("idempotency lock");
        guard.get(key).and_then(|e| {
            if e.last_seen.elapsed() <= self.window {
                e.success.clone()
            } else {
                None
            }
        })
    }

    /// Record an attempt sighting without a terminal result.
    pub fn record_attempt(&self, key: &str) {
        let mut guard = self.entries.lock().expect("idempotency lock");
        let entry = guard.entry(key.to_string()).or_insert(Entry {
            last_seen: Instant::now(),
            success: None,
        });
        entry.last_seen = Instant::now();
    }

    /// Record a successful terminal result for replay.
    pub fn record_success(&self, key: &str, result: PurchaseResult) {
        let mut guard = self.entries.lock().expect("idempotency lock");
        guard.insert(
            key.to_string(),
            Entry {
                last_seen: Instant::now(),
                success: Some(result),
            },
        );
    }

    /// Drop entries older than the window.
    pub fn prune(&self) {
        let mut guard = self.entries.lock().expect("idempotency lock");
        guard.retain(|_, e| e.last_seen.elapsed() <= self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mandi_core::types::RiskLevel;

    #[test]
    fn test_key_is_deterministic_and_sensitive() {
        let a = idempotency_key("zippy", "milk-1", "user-1", "2026-08-02");
        let b = idempotency_key("zippy", "milk-1", "user-1", "2026-08-02");
        let c = idempotency_key("zippy", "milk-1", "user-1", "2026-08-03");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_cache_round_trip() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let key = idempotency_key("zippy", "milk-1", "user-1", "2026-08-02");

        assert!(!cache.seen_recently(&key));
        cache.record_attempt(&key);
        assert!(cache.seen_recently(&key));
        assert!(cache.fresh_success(&key).is_none());

        let result = PurchaseResult::blocked(0, RiskLevel::Low, "placeholder");
        cache.record_success(&key, result);
        assert!(cache.fresh_success(&key).is_some());
    }

    #[test]
    fn test_window_expiry() {
        let cache = IdempotencyCache::new(Duration::from_millis(0));
        let key = idempotency_key("zippy", "milk-1", "user-1", "2026-08-02");
        cache.record_attempt(&key);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.seen_recently(&key));
        cache.prune();
    }
}
