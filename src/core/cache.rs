// src/core/cache.rs

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::core::clock::Clock;

pub const DEFAULT_CACHE_TTL_SECS: i64 = 30 * 60;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

/// A TTL cache keyed by normalized (trimmed, lower-cased) keys.
///
/// Expiry is evaluated lazily on `get`; `cleanup` sweeps everything stale.
pub struct ResultCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, Duration::seconds(DEFAULT_CACHE_TTL_SECS))
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let key = normalize_key(key);
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let expired = now - entries.get(&key)?.created_at > self.ttl;
        if expired {
            debug!(key = %key, "Cache entry expired.");
            entries.remove(&key);
            return None;
        }
        entries.get(&key).map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: &str, value: V) {
        let entry = CacheEntry { value, created_at: self.clock.now() };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_key(key), entry);
    }

    /// Drops every expired entry and reports how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now - entry.created_at <= self.ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        CacheStats { size: keys.len(), keys }
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    fn clock() -> Arc<ManualClock> {
        let start = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Arc::new(ManualClock::new(start))
    }

    #[test]
    fn value_survives_29_minutes_and_expires_by_31() {
        let clock = clock();
        let cache: ResultCache<String> = ResultCache::new(clock.clone());
        cache.set("example.com", "payload".to_string());

        clock.advance(Duration::minutes(29));
        assert_eq!(cache.get("example.com").as_deref(), Some("payload"));

        clock.advance(Duration::minutes(2));
        assert_eq!(cache.get("example.com"), None);
        assert_eq!(cache.stats().size, 0, "expired entry is evicted on read");
    }

    #[test]
    fn keys_are_normalized() {
        let cache: ResultCache<u32> = ResultCache::new(clock());
        cache.set("  Example.COM ", 7);
        assert_eq!(cache.get("example.com"), Some(7));
    }

    #[test]
    fn cleanup_sweeps_only_stale_entries() {
        let clock = clock();
        let cache: ResultCache<u32> = ResultCache::new(clock.clone());
        cache.set("old.example", 1);
        clock.advance(Duration::minutes(20));
        cache.set("new.example", 2);
        clock.advance(Duration::minutes(15));

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.stats(), CacheStats { size: 1, keys: vec!["new.example".to_string()] });
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache: ResultCache<u32> = ResultCache::new(clock());
        cache.set("a.example", 1);
        cache.set("b.example", 2);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
