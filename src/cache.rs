//! Cache adapter: positive results, negative markers, and circuit-breaker
//! state over an external key-value store.
//!
//! The store itself is an external collaborator behind [`CacheStore`];
//! the in-tree [`MemoryStore`] backs tests and single-node deployments
//! with per-entry TTLs. Every adapter operation is deadline-bounded and
//! error-swallowing: an unreachable store degrades the pipeline to
//! "no cache" (misses and dropped writes), it never fails a request.

use anyhow::Result;
use async_trait::async_trait;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::models::{SearchHit, Source};

// ============ Store seam ============

/// Minimal key-value contract the adapter needs: string values with a
/// per-entry TTL. Networked stores implement this out of tree.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> bool;
}

#[derive(Clone)]
struct TtlEntry {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, TtlEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &TtlEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process store with per-entry TTL semantics.
pub struct MemoryStore {
    inner: moka::future::Cache<String, TtlEntry>,
}

impl MemoryStore {
    pub fn new(max_entries: u64) -> Self {
        Self {
            inner: moka::future::Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.get(key).await.map(|e| e.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.inner
            .insert(key.to_string(), TtlEntry { value, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}

// ============ Keys ============

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Positive-result key. The raw query never appears in a key.
pub fn positive_key(normalized_primary: &str) -> String {
    format!("price:{}", sha256_hex(normalized_primary))
}

/// Negative-marker key.
pub fn negative_key(normalized_primary: &str) -> String {
    format!("price:neg:{}", sha256_hex(normalized_primary))
}

fn breaker_key(origin: &str) -> String {
    format!("cb:{origin}")
}

// ============ Stored shapes ============

/// Positive cache payload: the hit plus the path that produced it, so the
/// orchestrator can relabel `source=cache` while keeping provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub source: Source,
    pub hit: SearchHit,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BreakerState {
    open_until_epoch_ms: i64,
    consecutive_failures: u32,
}

// ============ Adapter ============

/// TTLs and the per-operation deadline.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub positive_ttl: Duration,
    pub negative_ttl: Duration,
    pub op_timeout: Duration,
    pub breaker_threshold: u32,
    pub breaker_open: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            positive_ttl: Duration::from_secs(21_600),
            negative_ttl: Duration::from_secs(60),
            op_timeout: Duration::from_millis(250),
            breaker_threshold: 3,
            breaker_open: Duration::from_secs(60),
        }
    }
}

pub struct CacheAdapter {
    store: Box<dyn CacheStore>,
    policy: CachePolicy,
}

impl CacheAdapter {
    pub fn new(store: Box<dyn CacheStore>, policy: CachePolicy) -> Self {
        Self { store, policy }
    }

    /// Bound a store operation by the adapter deadline, flattening the
    /// timeout and the store error into a miss.
    async fn bounded_get(&self, key: &str) -> Option<String> {
        match tokio::time::timeout(self.policy.op_timeout, self.store.get(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "cache read failed; treating as miss");
                None
            }
            Err(_) => {
                tracing::warn!(key_ns = key.split(':').next().unwrap_or(""), "cache read timed out");
                None
            }
        }
    }

    async fn bounded_set(&self, key: &str, value: String, ttl: Duration) {
        match tokio::time::timeout(self.policy.op_timeout, self.store.set(key, value, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "cache write failed; dropped"),
            Err(_) => tracing::warn!("cache write timed out; dropped"),
        }
    }

    pub async fn get_positive(&self, normalized_primary: &str) -> Option<CachedResult> {
        let raw = self.bounded_get(&positive_key(normalized_primary)).await?;
        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt positive cache entry; treating as miss");
                None
            }
        }
    }

    /// Best-effort write-through; failure is logged, never surfaced.
    pub async fn set_positive(&self, normalized_primary: &str, source: Source, hit: &SearchHit) {
        let entry = CachedResult {
            source,
            hit: hit.clone(),
        };
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                self.bounded_set(&positive_key(normalized_primary), raw, self.policy.positive_ttl)
                    .await
            }
            Err(e) => tracing::warn!(error = %e, "positive cache serialization failed"),
        }
    }

    pub async fn get_negative(&self, normalized_primary: &str) -> Option<String> {
        self.bounded_get(&negative_key(normalized_primary)).await
    }

    pub async fn set_negative(&self, normalized_primary: &str, reason: &str) {
        self.bounded_set(
            &negative_key(normalized_primary),
            reason.to_string(),
            self.policy.negative_ttl,
        )
        .await;
    }

    // ============ Circuit breaker ============

    async fn breaker_state(&self, origin: &str) -> BreakerState {
        match self.bounded_get(&breaker_key(origin)).await {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => BreakerState::default(),
        }
    }

    async fn store_breaker(&self, origin: &str, state: &BreakerState) {
        if let Ok(raw) = serde_json::to_string(state) {
            // Kept for twice the open window so counters survive reopen.
            self.bounded_set(&breaker_key(origin), raw, self.policy.breaker_open * 2)
                .await;
        }
    }

    /// True while the origin's breaker is open; FastPath must be skipped
    /// without issuing any request.
    pub async fn breaker_open(&self, origin: &str) -> bool {
        let state = self.breaker_state(origin).await;
        state.open_until_epoch_ms > chrono::Utc::now().timestamp_millis()
    }

    /// Record a Blocked/Timeout event. Read-modify-write: single-digit
    /// lost updates across workers are tolerated.
    pub async fn breaker_trip(&self, origin: &str) {
        let mut state = self.breaker_state(origin).await;
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.policy.breaker_threshold {
            state.open_until_epoch_ms =
                chrono::Utc::now().timestamp_millis() + self.policy.breaker_open.as_millis() as i64;
            tracing::warn!(
                origin,
                failures = state.consecutive_failures,
                open_secs = self.policy.breaker_open.as_secs(),
                "circuit breaker opened"
            );
        }
        self.store_breaker(origin, &state).await;
    }

    pub async fn breaker_reset(&self, origin: &str) {
        let key = breaker_key(origin);
        if tokio::time::timeout(self.policy.op_timeout, self.store.delete(&key))
            .await
            .is_err()
        {
            tracing::warn!(origin, "breaker reset timed out");
        }
    }

    pub async fn ping(&self) -> bool {
        tokio::time::timeout(self.policy.op_timeout, self.store.ping())
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Offer;

    fn sample_hit() -> SearchHit {
        SearchHit {
            product_id: Some("111222".into()),
            product_name: "삼성전자 갤럭시 버즈3 프로".into(),
            lowest_price: 215_500,
            link: "https://mallb.example.com/p/1".into(),
            top_offers: vec![Offer {
                rank: 1,
                mall: "몰B".into(),
                price: 215_500,
                free_shipping: false,
                delivery: "배송비 2,500원".into(),
                link: "https://mallb.example.com/p/1".into(),
            }],
            mall: Some("몰B".into()),
            free_shipping: Some(false),
        }
    }

    fn adapter(policy: CachePolicy) -> CacheAdapter {
        CacheAdapter::new(Box::new(MemoryStore::default()), policy)
    }

    #[test]
    fn test_keys_hash_not_raw_query() {
        let key = positive_key("갤럭시 버즈3 프로");
        assert!(key.starts_with("price:"));
        assert!(!key.contains("갤럭시"));
        assert_eq!(key.len(), "price:".len() + 64);
        // Deterministic, and distinct from the negative namespace.
        assert_eq!(key, positive_key("갤럭시 버즈3 프로"));
        assert_ne!(key, negative_key("갤럭시 버즈3 프로"));
    }

    #[tokio::test]
    async fn test_positive_roundtrip_keeps_source() {
        let cache = adapter(CachePolicy::default());
        assert!(cache.get_positive("버즈3 프로").await.is_none());

        cache
            .set_positive("버즈3 프로", Source::FastPath, &sample_hit())
            .await;
        let cached = cache.get_positive("버즈3 프로").await.unwrap();
        assert_eq!(cached.source, Source::FastPath);
        assert_eq!(cached.hit.lowest_price, 215_500);
        assert_eq!(cached.hit.top_offers.len(), 1);
    }

    #[tokio::test]
    async fn test_negative_entry_expires() {
        let cache = adapter(CachePolicy {
            negative_ttl: Duration::from_millis(50),
            ..CachePolicy::default()
        });
        cache.set_negative("없는 상품", "no product matched").await;
        assert_eq!(
            cache.get_negative("없는 상품").await.as_deref(),
            Some("no product matched")
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get_negative("없는 상품").await.is_none());
    }

    #[tokio::test]
    async fn test_breaker_opens_at_threshold() {
        let cache = adapter(CachePolicy::default());
        assert!(!cache.breaker_open("danawa").await);
        cache.breaker_trip("danawa").await;
        cache.breaker_trip("danawa").await;
        assert!(!cache.breaker_open("danawa").await);
        cache.breaker_trip("danawa").await;
        assert!(cache.breaker_open("danawa").await);
        // Origins are independent.
        assert!(!cache.breaker_open("other-site").await);
    }

    #[tokio::test]
    async fn test_breaker_reset_closes() {
        let cache = adapter(CachePolicy::default());
        for _ in 0..3 {
            cache.breaker_trip("danawa").await;
        }
        assert!(cache.breaker_open("danawa").await);
        cache.breaker_reset("danawa").await;
        assert!(!cache.breaker_open("danawa").await);
    }

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("connection refused")
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn ping(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_misses() {
        let cache = CacheAdapter::new(Box::new(FailingStore), CachePolicy::default());
        // Nothing here may panic or propagate an error.
        cache
            .set_positive("x", Source::SlowPath, &sample_hit())
            .await;
        assert!(cache.get_positive("x").await.is_none());
        assert!(cache.get_negative("x").await.is_none());
        cache.set_negative("x", "reason").await;
        cache.breaker_trip("danawa").await;
        assert!(!cache.breaker_open("danawa").await);
        assert!(!cache.ping().await);
    }
}
