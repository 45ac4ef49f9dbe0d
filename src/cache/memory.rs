//! Institutional memory: per-entity knowledge reused across unrelated runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use super::entry::{CacheEntry, TierStats, TtlClass};
use super::key::CacheKeyDeriver;
use super::store::{Lookup, TieredStore};
use crate::types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Company,
    Competitor,
    Industry,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Competitor => "competitor",
            Self::Industry => "industry",
        }
    }

    pub fn ttl_class(&self) -> TtlClass {
        match self {
            Self::Company => TtlClass::Company,
            Self::Competitor => TtlClass::Competitor,
            Self::Industry => TtlClass::Industry,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub data: Value,
    /// Stage or process that produced the record
    pub source: String,
    pub cached_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        data: Value,
        source: impl Into<String>,
        cached_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            data,
            source: source.into(),
            cached_at,
        }
    }
}

/// Memory tier keyed by `(entity type, lowercased entity id)`
pub struct InstitutionalMemory {
    store: TieredStore,
}

impl InstitutionalMemory {
    pub fn new(store: TieredStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    /// Current time on the tier's clock, for stamping new records
    pub fn now(&self) -> DateTime<Utc> {
        self.store.now()
    }

    pub fn key(entity_type: EntityType, entity_id: &str) -> Result<String> {
        CacheKeyDeriver::derive(
            "memory",
            &[
                json!(entity_type.as_str()),
                json!(entity_id.trim().to_lowercase()),
            ],
        )
    }

    /// Fresh record for the entity, or `None` on miss, staleness or fault.
    pub async fn recall(&self, entity_type: EntityType, entity_id: &str) -> Option<MemoryRecord> {
        match self.recall_lookup(entity_type, entity_id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => None,
            Err(e) => {
                warn!(%entity_type, entity_id, "Institutional memory unavailable: {}", e);
                None
            }
        }
    }

    /// Like [`recall`](Self::recall) but surfaces faults so callers can log the
    /// fallback path they take.
    pub async fn recall_lookup(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<MemoryRecord>> {
        let key = Self::key(entity_type, entity_id)?;
        match self.store.lookup(&key).await {
            Lookup::Hit(entry) => Ok(decode(entry)),
            Lookup::Miss => Ok(None),
            Lookup::Fault(e) => Err(e),
        }
    }

    /// Store a record under its entity's TTL class. Failures are logged and dropped.
    pub async fn remember(&self, record: &MemoryRecord, cost_saved_usd: f64) {
        let key = match Self::key(record.entity_type, &record.entity_id) {
            Ok(key) => key,
            Err(e) => {
                warn!(entity_id = %record.entity_id, "Skipping memory write: {}", e);
                return;
            }
        };
        let payload = match serde_json::to_value(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(entity_id = %record.entity_id, "Skipping memory write: {}", e);
                return;
            }
        };
        self.store
            .put_with_class(&key, payload, cost_saved_usd, record.entity_type.ttl_class())
            .await;
    }

    pub async fn stats(&self) -> TierStats {
        self.store.stats().await
    }
}

fn decode(entry: CacheEntry) -> Option<MemoryRecord> {
    match serde_json::from_value(entry.payload) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(key = %entry.key, "Discarding undecodable memory record: {}", e);
            None
        }
    }
}
