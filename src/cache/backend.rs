//! Cache backend abstraction.
//!
//! Backends are plain storage: they do not judge freshness and they report
//! failures as errors. Staleness and degrade-on-failure live in
//! [`TieredStore`](super::store::TieredStore).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::entry::{CacheEntry, CacheTier, TierStats, TtlClass};
use crate::types::Result;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch an entry regardless of age
    async fn load(&self, tier: CacheTier, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or replace an entry
    async fn save(&self, tier: CacheTier, entry: &CacheEntry) -> Result<()>;

    /// Increment the hit count and touch `last_accessed_at`. Returns the new count.
    async fn record_hit(&self, tier: CacheTier, key: &str, at: DateTime<Utc>) -> Result<u64>;

    /// Delete entries of a class created at or before `cutoff`
    async fn purge(&self, tier: CacheTier, class: TtlClass, cutoff: DateTime<Utc>)
    -> Result<usize>;

    async fn delete(&self, tier: CacheTier, key: &str) -> Result<bool>;

    async fn stats(&self, tier: CacheTier) -> Result<TierStats>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

pub type SharedBackend = Arc<dyn CacheBackend>;

// =============================================================================
// In-Memory Backend
// =============================================================================

/// Process-local backend over a concurrent map
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<(CacheTier, String), CacheEntry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn load(&self, tier: CacheTier, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .entries
            .get(&(tier, key.to_string()))
            .map(|e| e.value().clone()))
    }

    async fn save(&self, tier: CacheTier, entry: &CacheEntry) -> Result<()> {
        self.entries
            .insert((tier, entry.key.clone()), entry.clone());
        Ok(())
    }

    async fn record_hit(&self, tier: CacheTier, key: &str, at: DateTime<Utc>) -> Result<u64> {
        match self.entries.get_mut(&(tier, key.to_string())) {
            Some(mut entry) => {
                entry.hit_count += 1;
                entry.last_accessed_at = at;
                Ok(entry.hit_count)
            }
            None => Ok(0),
        }
    }

    async fn purge(
        &self,
        tier: CacheTier,
        class: TtlClass,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|(t, _), entry| {
            !(*t == tier && entry.ttl_class == class && entry.created_at <= cutoff)
        });
        Ok(before - self.entries.len())
    }

    async fn delete(&self, tier: CacheTier, key: &str) -> Result<bool> {
        Ok(self.entries.remove(&(tier, key.to_string())).is_some())
    }

    async fn stats(&self, tier: CacheTier) -> Result<TierStats> {
        let mut stats = TierStats::default();
        for item in self.entries.iter().filter(|item| item.key().0 == tier) {
            let entry = item.value();
            stats.total_records += 1;
            stats.hit_count += entry.hit_count;
            stats.estimated_cost_saved += entry.hit_count as f64 * entry.cost_saved_usd;
        }
        Ok(stats)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_tiers_are_isolated() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let entry = CacheEntry::new("k", json!(1), 0.5, TtlClass::Stage, now);
        backend.save(CacheTier::Stage, &entry).await.unwrap();

        assert!(backend.load(CacheTier::Stage, "k").await.unwrap().is_some());
        assert!(backend.load(CacheTier::Analysis, "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_hit_and_stats() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend
            .save(
                CacheTier::Analysis,
                &CacheEntry::new("a", json!(1), 2.0, TtlClass::Analysis, now),
            )
            .await
            .unwrap();

        assert_eq!(backend.record_hit(CacheTier::Analysis, "a", now).await.unwrap(), 1);
        assert_eq!(backend.record_hit(CacheTier::Analysis, "a", now).await.unwrap(), 2);
        assert_eq!(backend.record_hit(CacheTier::Analysis, "missing", now).await.unwrap(), 0);

        let stats = backend.stats(CacheTier::Analysis).await.unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.hit_count, 2);
        assert!((stats.estimated_cost_saved - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_purge_by_class_and_cutoff() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let old = now - chrono::Duration::days(10);
        backend
            .save(CacheTier::Memory, &CacheEntry::new("old-ind", json!(1), 0.0, TtlClass::Industry, old))
            .await
            .unwrap();
        backend
            .save(CacheTier::Memory, &CacheEntry::new("old-co", json!(1), 0.0, TtlClass::Company, old))
            .await
            .unwrap();
        backend
            .save(CacheTier::Memory, &CacheEntry::new("new-ind", json!(1), 0.0, TtlClass::Industry, now))
            .await
            .unwrap();

        let cutoff = now - chrono::Duration::days(3);
        let removed = backend
            .purge(CacheTier::Memory, TtlClass::Industry, cutoff)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.len(), 2);

        let again = backend
            .purge(CacheTier::Memory, TtlClass::Industry, cutoff)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }
}
