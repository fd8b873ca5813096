//! Run-scoped response cache.
//!
//! One [`RunCache`] lives exactly as long as one orchestrator run and is
//! dropped with it, so nothing leaks between runs. Entries are keyed by the
//! provider's native series rather than by instrument: instruments that map
//! to the same series on one provider share a single connector call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::source::FetchRequest;
use crate::{format_date, ObservationBatch, ProviderId};

/// Cache key: provider, native series key and date range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(provider: &ProviderId, request: &FetchRequest) -> Self {
        Self(format!(
            "{provider}|{}|{}|{}",
            request.series_key,
            format_date(request.range.start),
            format_date(request.range.end)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    batch: ObservationBatch,
    inserted_at: Instant,
    expires_at: Instant,
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl CacheInner {
    fn get(&self, key: &CacheKey) -> Option<ObservationBatch> {
        self.map.get(key).and_then(|entry| {
            if Instant::now() <= entry.expires_at {
                Some(entry.batch.clone())
            } else {
                None
            }
        })
    }

    fn put(&mut self, key: CacheKey, batch: ObservationBatch) {
        let now = Instant::now();
        if !self.map.contains_key(&key) && self.map.len() >= self.max_entries {
            self.clear_expired();
            if self.map.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.map.insert(
            key,
            CacheEntry {
                batch,
                inserted_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.map.remove(&key);
        }
    }

    fn clear_expired(&mut self) {
        let now = Instant::now();
        self.map.retain(|_, entry| entry.expires_at > now);
    }
}

/// Thread-safe, bounded, expiring cache of connector batches.
#[derive(Debug, Clone)]
pub struct RunCache {
    inner: Arc<tokio::sync::RwLock<CacheInner>>,
}

impl RunCache {
    /// Create a cache. A zero TTL or zero capacity disables caching.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(CacheInner {
                map: HashMap::new(),
                ttl,
                max_entries,
            })),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    pub async fn get(&self, key: &CacheKey) -> Option<ObservationBatch> {
        let store = self.inner.read().await;
        store.get(key)
    }

    pub async fn put(&self, key: CacheKey, batch: ObservationBatch) {
        let mut store = self.inner.write().await;
        if store.ttl.is_zero() || store.max_entries == 0 {
            return;
        }
        store.put(key, batch);
    }

    /// Number of entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::{DateRange, InstrumentId, Observation};

    fn request(series: &str) -> FetchRequest {
        FetchRequest::new(
            InstrumentId::parse("WTI").expect("id"),
            series,
            DateRange::new(date!(2026 - 03 - 02), date!(2026 - 03 - 06)).expect("range"),
        )
    }

    fn batch(instrument: &str) -> ObservationBatch {
        ObservationBatch::new(
            ProviderId::parse("eia").expect("id"),
            InstrumentId::parse(instrument).expect("id"),
            vec![Observation::new(date!(2026 - 03 - 02), 70.0)],
        )
    }

    fn key(series: &str) -> CacheKey {
        CacheKey::new(&ProviderId::parse("eia").expect("id"), &request(series))
    }

    #[tokio::test]
    async fn returns_cached_batch_until_expiry() {
        let cache = RunCache::new(Duration::from_millis(100), 8);
        assert!(cache.get(&key("WTI")).await.is_none());

        cache.put(key("WTI"), batch("WTI")).await;
        assert_eq!(cache.get(&key("WTI")).await, Some(batch("WTI")));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get(&key("WTI")).await.is_none());
    }

    #[tokio::test]
    async fn evicts_oldest_entry_when_full() {
        let cache = RunCache::new(Duration::from_secs(60), 2);
        cache.put(key("WTI"), batch("WTI")).await;
        cache.put(key("BRENT"), batch("BRENT")).await;
        cache.put(key("HH"), batch("HH")).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&key("WTI")).await.is_none());
        assert!(cache.get(&key("HH")).await.is_some());
    }

    #[tokio::test]
    async fn disabled_cache_stores_nothing() {
        let cache = RunCache::disabled();
        cache.put(key("WTI"), batch("WTI")).await;
        assert!(cache.is_empty().await);
    }

    #[test]
    fn keys_follow_the_native_series_not_the_instrument() {
        let range = DateRange::new(date!(2026 - 03 - 02), date!(2026 - 03 - 06)).expect("range");
        let eia = ProviderId::parse("eia").expect("id");
        let spot = FetchRequest::new(InstrumentId::parse("WTI").expect("id"), "RWTC", range);
        let alias = FetchRequest::new(InstrumentId::parse("WTI.SPOT").expect("id"), "RWTC", range);

        assert_eq!(CacheKey::new(&eia, &spot), CacheKey::new(&eia, &alias));
        assert_ne!(key("RWTC"), key("RBRTE"));
        assert_eq!(CacheKey::new(&eia, &spot).as_str(), "eia|RWTC|2026-03-02|2026-03-06");
    }
}
