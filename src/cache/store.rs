//! Tier-scoped cache store.
//!
//! A `TieredStore` wraps a [`CacheBackend`] with the rules callers rely on:
//!
//! - stale entries read as misses, whether or not they were purged
//! - backend faults and timeouts never escape `get`/`put`; reads degrade to a
//!   miss and writes to a logged no-op
//! - `put` over a fresh entry of the same class is a rewrite of the same
//!   computation: payload and cost change, `created_at` and `hit_count` stay
//! - `replace` always starts a new lifetime
//!
//! Physical deletion of expired rows is a separate maintenance call
//! ([`TieredStore::purge_expired`]) and is not synchronized with reads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::backend::SharedBackend;
use super::entry::{CacheEntry, CacheTier, TierStats, TtlClass, TtlPolicy};
use crate::ai::timeout::with_timeout;
use crate::types::{ForgeError, Result};

// =============================================================================
// Clock
// =============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for TTL tests and replay
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Ok(by) = chrono::Duration::from_std(by) {
            *now += by;
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Outcome of a cache read, keeping faults distinguishable from misses
#[derive(Debug)]
pub enum Lookup {
    Hit(CacheEntry),
    Miss,
    /// Backend failed or timed out. Callers treat this as a miss.
    Fault(ForgeError),
}

impl Lookup {
    pub fn into_hit(self) -> Option<CacheEntry> {
        match self {
            Self::Hit(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

// =============================================================================
// TieredStore
// =============================================================================

pub struct TieredStore {
    tier: CacheTier,
    backend: SharedBackend,
    policy: TtlPolicy,
    clock: SharedClock,
    io_timeout: Duration,
}

impl TieredStore {
    pub fn new(
        tier: CacheTier,
        backend: SharedBackend,
        policy: TtlPolicy,
        clock: SharedClock,
        io_timeout: Duration,
    ) -> Self {
        Self {
            tier,
            backend,
            policy,
            clock,
            io_timeout,
        }
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn default_class(&self) -> TtlClass {
        self.tier.ttl_classes()[0]
    }

    fn unavailable(&self, operation: &str, err: ForgeError) -> ForgeError {
        match err {
            ForgeError::CacheUnavailable { .. } => err,
            other => ForgeError::cache_unavailable(self.tier.as_str(), operation, other.to_string()),
        }
    }

    /// Read with hit accounting. Faults are reported, not raised.
    pub async fn lookup(&self, key: &str) -> Lookup {
        let loaded = with_timeout(
            self.io_timeout,
            self.backend.load(self.tier, key),
            "cache load",
        )
        .await;

        let mut entry = match loaded {
            Ok(Some(entry)) => entry,
            Ok(None) => return Lookup::Miss,
            Err(e) => return Lookup::Fault(self.unavailable("get", e)),
        };

        let now = self.clock.now();
        if !entry.is_fresh(now, &self.policy) {
            debug!(
                tier = %self.tier,
                key,
                age_secs = entry.age(now).as_secs(),
                "Stale cache entry treated as miss"
            );
            return Lookup::Miss;
        }

        match with_timeout(
            self.io_timeout,
            self.backend.record_hit(self.tier, key, now),
            "cache hit accounting",
        )
        .await
        {
            Ok(count) if count > 0 => entry.hit_count = count,
            Ok(_) => entry.hit_count += 1,
            Err(e) => {
                warn!(tier = %self.tier, key, "Failed to record cache hit: {}", e);
                entry.hit_count += 1;
            }
        }
        entry.last_accessed_at = now;
        Lookup::Hit(entry)
    }

    /// Fresh entry or `None`. Backend faults degrade to a miss.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.lookup(key).await {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Miss => None,
            Lookup::Fault(e) => {
                warn!(tier = %self.tier, key, "Cache read degraded to miss: {}", e);
                None
            }
        }
    }

    /// Raw read without freshness filtering or hit accounting
    pub async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        with_timeout(
            self.io_timeout,
            self.backend.load(self.tier, key),
            "cache peek",
        )
        .await
        .map_err(|e| self.unavailable("peek", e))
    }

    /// Upsert with the tier's default TTL class. Failures are logged and dropped.
    pub async fn put(&self, key: &str, payload: Value, cost_saved_usd: f64) {
        self.put_with_class(key, payload, cost_saved_usd, self.default_class())
            .await
    }

    pub async fn put_with_class(
        &self,
        key: &str,
        payload: Value,
        cost_saved_usd: f64,
        class: TtlClass,
    ) {
        if let Err(e) = self.try_put(key, payload, cost_saved_usd, class).await {
            warn!(tier = %self.tier, key, "Cache write skipped: {}", e);
        }
    }

    /// Upsert that reports failures.
    ///
    /// A fresh entry under the same key and class keeps its `created_at` and
    /// `hit_count`; a missing or stale one starts a new lifetime. If the
    /// existing entry cannot be read, the write still goes through as a new
    /// lifetime.
    pub async fn try_put(
        &self,
        key: &str,
        payload: Value,
        cost_saved_usd: f64,
        class: TtlClass,
    ) -> Result<()> {
        self.write(key, payload, cost_saved_usd, class, false).await
    }

    /// Overwrite with a new lifetime. Failures are logged and dropped.
    pub async fn replace(&self, key: &str, payload: Value, cost_saved_usd: f64) {
        if let Err(e) = self
            .try_replace(key, payload, cost_saved_usd, self.default_class())
            .await
        {
            warn!(tier = %self.tier, key, "Cache replace skipped: {}", e);
        }
    }

    /// Overwrite that resets `created_at` and `hit_count`, reporting failures
    pub async fn try_replace(
        &self,
        key: &str,
        payload: Value,
        cost_saved_usd: f64,
        class: TtlClass,
    ) -> Result<()> {
        self.write(key, payload, cost_saved_usd, class, true).await
    }

    async fn write(
        &self,
        key: &str,
        payload: Value,
        cost_saved_usd: f64,
        class: TtlClass,
        new_lifetime: bool,
    ) -> Result<()> {
        if !self.tier.ttl_classes().contains(&class) {
            return Err(ForgeError::InvalidInput(format!(
                "TTL class {} does not belong to the {} tier",
                class.as_str(),
                self.tier
            )));
        }

        let now = self.clock.now();
        let mut entry = CacheEntry::new(key, payload, cost_saved_usd, class, now);

        if !new_lifetime {
            match self.peek(key).await {
                Ok(Some(existing))
                    if existing.ttl_class == class && existing.is_fresh(now, &self.policy) =>
                {
                    entry.created_at = existing.created_at;
                    entry.hit_count = existing.hit_count;
                    entry.last_accessed_at = existing.last_accessed_at;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(tier = %self.tier, key, "Existing entry unreadable, writing new lifetime: {}", e);
                }
            }
        }

        with_timeout(
            self.io_timeout,
            self.backend.save(self.tier, &entry),
            "cache save",
        )
        .await
        .map_err(|e| self.unavailable("put", e))
    }

    /// Aggregate for this tier. Backend faults degrade to zeros.
    pub async fn stats(&self) -> TierStats {
        match with_timeout(self.io_timeout, self.backend.stats(self.tier), "cache stats").await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(tier = %self.tier, "Cache stats unavailable: {}", e);
                TierStats::default()
            }
        }
    }

    /// Physically delete entries whose TTL has elapsed. Idempotent.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        for &class in self.tier.ttl_classes() {
            let ttl = chrono::Duration::from_std(self.policy.ttl_for(class))
                .map_err(|e| ForgeError::Config(format!("TTL out of range: {}", e)))?;
            let cutoff = now.checked_sub_signed(ttl).ok_or_else(|| {
                ForgeError::Config(format!(
                    "{} TTL reaches before the earliest representable date",
                    class.as_str()
                ))
            })?;
            removed += self
                .backend
                .purge(self.tier, class, cutoff)
                .await
                .map_err(|e| self.unavailable("purge", e))?;
        }
        if removed > 0 {
            debug!(tier = %self.tier, removed, backend = self.backend.name(), "Purged expired entries");
        }
        Ok(removed)
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        with_timeout(
            self.io_timeout,
            self.backend.delete(self.tier, key),
            "cache delete",
        )
        .await
        .map_err(|e| self.unavailable("delete", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{CacheBackend, MemoryBackend};
    use crate::pipeline::testing::FlakyBackend;
    use async_trait::async_trait;
    use serde_json::json;

    /// Backend whose loads never complete
    struct HangingBackend;

    #[async_trait]
    impl CacheBackend for HangingBackend {
        async fn load(&self, _: CacheTier, _: &str) -> Result<Option<CacheEntry>> {
            futures::future::pending().await
        }
        async fn save(&self, _: CacheTier, _: &CacheEntry) -> Result<()> {
            futures::future::pending().await
        }
        async fn record_hit(&self, _: CacheTier, _: &str, _: DateTime<Utc>) -> Result<u64> {
            futures::future::pending().await
        }
        async fn purge(&self, _: CacheTier, _: TtlClass, _: DateTime<Utc>) -> Result<usize> {
            Ok(0)
        }
        async fn delete(&self, _: CacheTier, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn stats(&self, _: CacheTier) -> Result<TierStats> {
            futures::future::pending().await
        }
        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn store_with(
        tier: CacheTier,
        backend: SharedBackend,
        clock: Arc<ManualClock>,
    ) -> TieredStore {
        TieredStore::new(
            tier,
            backend,
            TtlPolicy::default(),
            clock,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_hit_increments_count() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store_with(CacheTier::Stage, Arc::new(MemoryBackend::new()), clock.clone());

        assert!(store.get("k").await.is_none());
        store.put("k", json!({"v": 1}), 0.2).await;

        let first = store.get("k").await.unwrap();
        assert_eq!(first.hit_count, 1);
        clock.advance(Duration::from_secs(60));
        let second = store.get("k").await.unwrap();
        assert_eq!(second.hit_count, 2);
        assert_eq!(second.last_accessed_at, clock.now());
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(CacheTier::Stage, backend.clone(), clock.clone());
        store.put("k", json!("payload"), 0.1).await;

        // stage TTL is 72h
        clock.advance(Duration::from_secs(72 * 3600 - 1));
        let hit = store.get("k").await.unwrap();
        assert_eq!(hit.hit_count, 1);

        clock.advance(Duration::from_secs(1));
        assert!(store.get("k").await.is_none());

        // stale entries are not physically removed by reads
        assert_eq!(backend.len(), 1);
        let raw = store.peek("k").await.unwrap().unwrap();
        assert_eq!(raw.hit_count, 1);
    }

    #[tokio::test]
    async fn test_rewrite_keeps_created_at() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store = store_with(CacheTier::Analysis, Arc::new(MemoryBackend::new()), clock.clone());

        store.put("run", json!({"a": 1}), 1.0).await;
        store.get("run").await.unwrap();
        clock.advance(Duration::from_secs(3600));
        store.put("run", json!({"a": 2}), 1.5).await;

        let entry = store.peek("run").await.unwrap().unwrap();
        assert_eq!(entry.created_at, start);
        assert_eq!(entry.hit_count, 1);
        assert_eq!(entry.payload, json!({"a": 2}));
        assert_eq!(entry.cost_saved_usd, 1.5);
    }

    #[tokio::test]
    async fn test_recomputed_stage_result_keeps_lifetime() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store = store_with(CacheTier::Stage, Arc::new(MemoryBackend::new()), clock.clone());
        let result = |duration_ms: u64| {
            json!({
                "stage": "strategy",
                "output": {"initiatives": ["expand"]},
                "cost_usd": 0.02,
                "duration_ms": duration_ms,
                "model_id": "gpt-4o",
                "source": "executed",
            })
        };

        store.put("strategy", result(5), 0.02).await;
        assert_eq!(store.get("strategy").await.unwrap().hit_count, 1);
        clock.advance(Duration::from_secs(3600));
        store.put("strategy", result(7), 0.02).await;

        let entry = store.peek("strategy").await.unwrap().unwrap();
        assert_eq!(entry.created_at, start);
        assert_eq!(entry.hit_count, 1);
        assert_eq!(entry.payload["duration_ms"], 7);
        assert!((store.stats().await.estimated_cost_saved - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_replace_starts_new_lifetime() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store_with(CacheTier::Analysis, Arc::new(MemoryBackend::new()), clock.clone());

        store.put("run", json!({"a": 1}), 1.0).await;
        store.get("run").await.unwrap();
        clock.advance(Duration::from_secs(3600));
        store.replace("run", json!({"a": 2}), 1.0).await;

        let entry = store.peek("run").await.unwrap().unwrap();
        assert_eq!(entry.created_at, clock.now());
        assert_eq!(entry.hit_count, 0);
        assert_eq!(entry.payload, json!({"a": 2}));
    }

    #[tokio::test]
    async fn test_write_survives_read_faults() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backend = Arc::new(FlakyBackend::new());
        let store = store_with(CacheTier::Stage, backend.clone(), clock);

        backend.fail_reads(true);
        store
            .try_put("k", json!(1), 0.1, TtlClass::Stage)
            .await
            .unwrap();
        assert_eq!(backend.len(), 1);

        backend.fail_reads(false);
        assert!(store.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_stale_rewrite_starts_new_lifetime() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store_with(CacheTier::Stage, Arc::new(MemoryBackend::new()), clock.clone());

        store.put("k", json!(1), 0.0).await;
        clock.advance(Duration::from_secs(100 * 3600));
        store.put("k", json!(1), 0.0).await;

        assert!(store.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_faults_degrade() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backend = Arc::new(FlakyBackend::new());
        let store = store_with(CacheTier::Stage, backend.clone(), clock);

        store.put("k", json!(1), 0.5).await;
        backend.set_failing(true);

        assert!(store.lookup("k").await.is_fault());
        assert!(store.get("k").await.is_none());
        // write is a silent no-op
        store.put("other", json!(2), 0.5).await;
        assert!(store.try_put("other", json!(2), 0.5, TtlClass::Stage).await.is_err());
        assert_eq!(store.stats().await, TierStats::default());

        backend.set_failing(false);
        assert!(store.get("k").await.is_some());
        assert!(store.get("other").await.is_none());
    }

    #[tokio::test]
    async fn test_hanging_backend_times_out() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store_with(CacheTier::Analysis, Arc::new(HangingBackend), clock);

        match store.lookup("k").await {
            Lookup::Fault(ForgeError::CacheUnavailable { operation, .. }) => {
                assert_eq!(operation, "get")
            }
            other => panic!("expected fault, got {:?}", other),
        }
        store.put("k", json!(1), 0.0).await;
    }

    #[tokio::test]
    async fn test_wrong_class_rejected() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store_with(CacheTier::Stage, Arc::new(MemoryBackend::new()), clock);
        let err = store
            .try_put("k", json!(1), 0.0, TtlClass::Company)
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_purge_expired_is_idempotent() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(CacheTier::Memory, backend.clone(), clock.clone());

        store
            .put_with_class("industry", json!("i"), 0.0, TtlClass::Industry)
            .await;
        store
            .put_with_class("company", json!("c"), 0.0, TtlClass::Company)
            .await;

        clock.advance(Duration::from_secs(4 * 24 * 3600));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert_eq!(backend.len(), 1);
        assert!(store.get("company").await.is_some());
    }

    #[tokio::test]
    async fn test_purge_with_oversized_ttl_is_config_error() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let policy = TtlPolicy {
            stage: Duration::from_secs(9_000_000_000_000),
            ..TtlPolicy::default()
        };
        let store = TieredStore::new(
            CacheTier::Stage,
            Arc::new(MemoryBackend::new()),
            policy,
            clock,
            Duration::from_millis(200),
        );

        let err = store.purge_expired().await.unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }
}
