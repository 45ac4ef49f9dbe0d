//! SQLite cache backend.
//!
//! All tiers share the `cache_entries` table, partitioned by the `tier`
//! column. Timestamps are stored as Unix milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{OptionalExtension, params};

use super::backend::CacheBackend;
use super::entry::{CacheEntry, CacheTier, TierStats, TtlClass};
use crate::storage::{SharedDatabase, run_blocking};
use crate::types::{ForgeError, Result, ResultExt};

pub struct SqliteBackend {
    db: SharedDatabase,
}

impl SqliteBackend {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

type EntryRow = (String, String, i64, i64, i64, f64, String);

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ForgeError::Storage(format!("Invalid timestamp: {}", ms)))
}

fn into_entry(row: EntryRow) -> Result<CacheEntry> {
    let (key, payload, created, accessed, hits, cost_saved, class) = row;
    Ok(CacheEntry {
        key,
        payload: serde_json::from_str(&payload)?,
        created_at: from_millis(created)?,
        last_accessed_at: from_millis(accessed)?,
        hit_count: hits.max(0) as u64,
        cost_saved_usd: cost_saved,
        ttl_class: TtlClass::parse(&class)?,
    })
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn load(&self, tier: CacheTier, key: &str) -> Result<Option<CacheEntry>> {
        let key = key.to_string();
        run_blocking(&self.db, move |db| {
            let row: Option<EntryRow> = db
                .connection()?
                .query_row(
                    "SELECT key, payload, created_at, last_accessed_at, hit_count,
                            cost_saved_usd, ttl_class
                     FROM cache_entries WHERE tier = ?1 AND key = ?2",
                    params![tier.as_str(), key],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    },
                )
                .optional()
                .with_context("Failed to load cache entry")?;
            row.map(into_entry).transpose()
        })
        .await
    }

    async fn save(&self, tier: CacheTier, entry: &CacheEntry) -> Result<()> {
        let entry = entry.clone();
        run_blocking(&self.db, move |db| {
            let payload = serde_json::to_string(&entry.payload)?;
            db.connection()?
                .execute(
                    "INSERT INTO cache_entries
                     (tier, key, payload, created_at, last_accessed_at, hit_count,
                      cost_saved_usd, ttl_class)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(tier, key) DO UPDATE SET
                        payload = excluded.payload,
                        created_at = excluded.created_at,
                        last_accessed_at = excluded.last_accessed_at,
                        hit_count = excluded.hit_count,
                        cost_saved_usd = excluded.cost_saved_usd,
                        ttl_class = excluded.ttl_class",
                    params![
                        tier.as_str(),
                        entry.key,
                        payload,
                        entry.created_at.timestamp_millis(),
                        entry.last_accessed_at.timestamp_millis(),
                        entry.hit_count as i64,
                        entry.cost_saved_usd,
                        entry.ttl_class.as_str(),
                    ],
                )
                .with_context("Failed to save cache entry")?;
            Ok(())
        })
        .await
    }

    async fn record_hit(&self, tier: CacheTier, key: &str, at: DateTime<Utc>) -> Result<u64> {
        let key = key.to_string();
        run_blocking(&self.db, move |db| {
            db.transaction(|conn| {
                conn.execute(
                    "UPDATE cache_entries
                     SET hit_count = hit_count + 1, last_accessed_at = ?3
                     WHERE tier = ?1 AND key = ?2",
                    params![tier.as_str(), key, at.timestamp_millis()],
                )?;
                let hits: Option<i64> = conn
                    .query_row(
                        "SELECT hit_count FROM cache_entries WHERE tier = ?1 AND key = ?2",
                        params![tier.as_str(), key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(hits.unwrap_or(0).max(0) as u64)
            })
        })
        .await
    }

    async fn purge(
        &self,
        tier: CacheTier,
        class: TtlClass,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        run_blocking(&self.db, move |db| {
            db.execute(
                "DELETE FROM cache_entries
                 WHERE tier = ?1 AND ttl_class = ?2 AND created_at <= ?3",
                &[&tier.as_str(), &class.as_str(), &cutoff.timestamp_millis()],
            )
        })
        .await
    }

    async fn delete(&self, tier: CacheTier, key: &str) -> Result<bool> {
        let key = key.to_string();
        run_blocking(&self.db, move |db| {
            let removed = db.execute(
                "DELETE FROM cache_entries WHERE tier = ?1 AND key = ?2",
                &[&tier.as_str(), &key],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn stats(&self, tier: CacheTier) -> Result<TierStats> {
        run_blocking(&self.db, move |db| {
            let (records, hits, saved): (i64, i64, f64) = db
                .connection()?
                .query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(hit_count), 0),
                            COALESCE(SUM(hit_count * cost_saved_usd), 0.0)
                     FROM cache_entries WHERE tier = ?1",
                    params![tier.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .with_context("Failed to compute cache stats")?;
            Ok(TierStats {
                total_records: records.max(0) as u64,
                hit_count: hits.max(0) as u64,
                estimated_cost_saved: saved,
            })
        })
        .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use serde_json::json;
    use std::sync::Arc;

    fn backend() -> SqliteBackend {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        SqliteBackend::new(Arc::new(db))
    }

    fn entry(key: &str, class: TtlClass, created: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new(key, json!({"k": key}), 0.25, class, created)
    }

    #[tokio::test]
    async fn test_save_load_upsert() {
        let backend = backend();
        let now = Utc::now();
        backend
            .save(CacheTier::Stage, &entry("s1", TtlClass::Stage, now))
            .await
            .unwrap();

        let loaded = backend.load(CacheTier::Stage, "s1").await.unwrap().unwrap();
        assert_eq!(loaded.payload, json!({"k": "s1"}));
        assert_eq!(loaded.created_at.timestamp_millis(), now.timestamp_millis());

        let mut replaced = loaded.clone();
        replaced.payload = json!({"k": "v2"});
        backend.save(CacheTier::Stage, &replaced).await.unwrap();

        let stats = backend.stats(CacheTier::Stage).await.unwrap();
        assert_eq!(stats.total_records, 1);
        let loaded = backend.load(CacheTier::Stage, "s1").await.unwrap().unwrap();
        assert_eq!(loaded.payload, json!({"k": "v2"}));
    }

    #[tokio::test]
    async fn test_record_hit_increments() {
        let backend = backend();
        let now = Utc::now();
        backend
            .save(CacheTier::Analysis, &entry("a", TtlClass::Analysis, now))
            .await
            .unwrap();

        let later = now + chrono::Duration::minutes(1);
        assert_eq!(backend.record_hit(CacheTier::Analysis, "a", later).await.unwrap(), 1);
        assert_eq!(backend.record_hit(CacheTier::Analysis, "a", later).await.unwrap(), 2);

        let loaded = backend.load(CacheTier::Analysis, "a").await.unwrap().unwrap();
        assert_eq!(loaded.hit_count, 2);
        assert_eq!(loaded.last_accessed_at.timestamp_millis(), later.timestamp_millis());

        let stats = backend.stats(CacheTier::Analysis).await.unwrap();
        assert!((stats.estimated_cost_saved - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_purge_and_delete() {
        let backend = backend();
        let now = Utc::now();
        let old = now - chrono::Duration::days(40);
        backend
            .save(CacheTier::Memory, &entry("c-old", TtlClass::Company, old))
            .await
            .unwrap();
        backend
            .save(CacheTier::Memory, &entry("c-new", TtlClass::Company, now))
            .await
            .unwrap();

        let cutoff = now - chrono::Duration::days(30);
        assert_eq!(
            backend.purge(CacheTier::Memory, TtlClass::Company, cutoff).await.unwrap(),
            1
        );
        assert_eq!(
            backend.purge(CacheTier::Memory, TtlClass::Company, cutoff).await.unwrap(),
            0
        );

        assert!(backend.delete(CacheTier::Memory, "c-new").await.unwrap());
        assert!(!backend.delete(CacheTier::Memory, "c-new").await.unwrap());
    }
}
