//! Three-tier cache: whole-run results, single stage outputs, and
//! long-lived institutional memory, all over one [`CacheBackend`].

pub mod backend;
pub mod entry;
pub mod key;
pub mod memory;
pub mod sqlite;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub use backend::{CacheBackend, MemoryBackend, SharedBackend};
pub use entry::{CacheEntry, CacheTier, TierStats, TtlClass, TtlPolicy};
pub use key::{CacheKeyDeriver, normalized_snippet};
pub use memory::{EntityType, InstitutionalMemory, MemoryRecord};
pub use sqlite::SqliteBackend;
pub use store::{Clock, Lookup, ManualClock, SharedClock, SystemClock, TieredStore};

use crate::ai::TimeoutConfig;
use crate::config::Config;
use crate::types::Result;

/// Cross-tier statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_records: u64,
    pub records_by_tier: BTreeMap<String, u64>,
    pub hit_count_by_tier: BTreeMap<String, u64>,
    pub estimated_total_cost_saved: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeReport {
    pub by_tier: BTreeMap<String, usize>,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.by_tier.values().sum()
    }
}

pub struct CacheLayer {
    pub analysis: TieredStore,
    pub stages: TieredStore,
    pub memory: InstitutionalMemory,
}

impl CacheLayer {
    pub fn new(
        backend: SharedBackend,
        policy: TtlPolicy,
        clock: SharedClock,
        io_timeout: Duration,
    ) -> Self {
        let store = |tier| {
            TieredStore::new(tier, Arc::clone(&backend), policy, Arc::clone(&clock), io_timeout)
        };
        Self {
            analysis: store(CacheTier::Analysis),
            stages: store(CacheTier::Stage),
            memory: InstitutionalMemory::new(store(CacheTier::Memory)),
        }
    }

    pub fn from_config(config: &Config, backend: SharedBackend) -> Result<Self> {
        Ok(Self::new(
            backend,
            TtlPolicy::from_config(&config.cache)?,
            Arc::new(SystemClock),
            TimeoutConfig::from_config(&config.pipeline).cache_io,
        ))
    }

    fn tiers(&self) -> [&TieredStore; 3] {
        [&self.analysis, &self.stages, self.memory.store()]
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for store in self.tiers() {
            let tier = store.stats().await;
            let name = store.tier().as_str().to_string();
            stats.total_records += tier.total_records;
            stats.estimated_total_cost_saved += tier.estimated_cost_saved;
            stats.records_by_tier.insert(name.clone(), tier.total_records);
            stats.hit_count_by_tier.insert(name, tier.hit_count);
        }
        stats
    }

    pub async fn purge_expired(&self) -> Result<PurgeReport> {
        let mut report = PurgeReport::default();
        for store in self.tiers() {
            let removed = store.purge_expired().await?;
            report.by_tier.insert(store.tier().as_str().to_string(), removed);
        }
        Ok(report)
    }
}
