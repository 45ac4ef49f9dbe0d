//! Cache entries, tiers and TTL classes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CacheConfig;
use crate::constants::cache as cache_defaults;
use crate::types::{ForgeError, Result};

/// Scope of a cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// Whole-run results
    Analysis,
    /// Single stage outputs
    Stage,
    /// Long-lived entity knowledge
    Memory,
}

impl CacheTier {
    pub const ALL: [CacheTier; 3] = [CacheTier::Analysis, CacheTier::Stage, CacheTier::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Stage => "stage",
            Self::Memory => "memory",
        }
    }

    /// TTL classes an entry in this tier may carry
    pub fn ttl_classes(&self) -> &'static [TtlClass] {
        match self {
            Self::Analysis => &[TtlClass::Analysis],
            Self::Stage => &[TtlClass::Stage],
            Self::Memory => &[TtlClass::Company, TtlClass::Competitor, TtlClass::Industry],
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides how long an entry stays eligible for reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    Analysis,
    Stage,
    Company,
    Competitor,
    Industry,
}

impl TtlClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Stage => "stage",
            Self::Company => "company",
            Self::Competitor => "competitor",
            Self::Industry => "industry",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "analysis" => Ok(Self::Analysis),
            "stage" => Ok(Self::Stage),
            "company" => Ok(Self::Company),
            "competitor" => Ok(Self::Competitor),
            "industry" => Ok(Self::Industry),
            other => Err(ForgeError::Storage(format!("Unknown TTL class: {}", other))),
        }
    }
}

/// TTL per class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub analysis: Duration,
    pub stage: Duration,
    pub company: Duration,
    pub competitor: Duration,
    pub industry: Duration,
}

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

impl TtlPolicy {
    /// Fails with a config error when a TTL does not fit in a `Duration`
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            analysis: config.analysis_ttl()?,
            stage: config.stage_ttl()?,
            company: config.memory.company_ttl()?,
            competitor: config.memory.competitor_ttl()?,
            industry: config.memory.industry_ttl()?,
        })
    }

    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Analysis => self.analysis,
            TtlClass::Stage => self.stage,
            TtlClass::Company => self.company,
            TtlClass::Competitor => self.competitor,
            TtlClass::Industry => self.industry,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            analysis: Duration::from_secs(cache_defaults::ANALYSIS_TTL_HOURS * HOUR),
            stage: Duration::from_secs(cache_defaults::STAGE_TTL_HOURS * HOUR),
            company: Duration::from_secs(cache_defaults::COMPANY_TTL_DAYS * DAY),
            competitor: Duration::from_secs(cache_defaults::COMPETITOR_TTL_DAYS * DAY),
            industry: Duration::from_secs(cache_defaults::INDUSTRY_TTL_DAYS * DAY),
        }
    }
}

/// A stored payload with reuse bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub hit_count: u64,
    /// Cost avoided each time this entry is reused
    pub cost_saved_usd: f64,
    pub ttl_class: TtlClass,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        payload: Value,
        cost_saved_usd: f64,
        ttl_class: TtlClass,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            payload,
            created_at: now,
            last_accessed_at: now,
            hit_count: 0,
            cost_saved_usd,
            ttl_class,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Entries whose age has reached the TTL are stale.
    pub fn is_fresh(&self, now: DateTime<Utc>, policy: &TtlPolicy) -> bool {
        self.age(now) < policy.ttl_for(self.ttl_class)
    }
}

/// Per-tier aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TierStats {
    pub total_records: u64,
    pub hit_count: u64,
    /// Sum of `hit_count * cost_saved_usd`
    pub estimated_cost_saved: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_freshness_boundary() {
        let policy = TtlPolicy::default();
        let created = Utc::now();
        let entry = CacheEntry::new("k", json!({}), 0.1, TtlClass::Industry, created);

        let just_before = created + chrono::Duration::days(3) - chrono::Duration::seconds(1);
        let at_ttl = created + chrono::Duration::days(3);
        assert!(entry.is_fresh(just_before, &policy));
        assert!(!entry.is_fresh(at_ttl, &policy));
    }

    #[test]
    fn test_clock_skew_counts_as_fresh() {
        let now = Utc::now();
        let entry = CacheEntry::new("k", json!(1), 0.0, TtlClass::Stage, now);
        assert_eq!(entry.age(now - chrono::Duration::minutes(5)), Duration::ZERO);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.analysis, Duration::from_secs(168 * 3600));
        assert_eq!(policy.company, Duration::from_secs(30 * DAY));
        assert_eq!(policy.competitor, Duration::from_secs(7 * DAY));
        assert_eq!(policy.ttl_for(TtlClass::Industry), Duration::from_secs(3 * DAY));
        assert_eq!(TtlPolicy::from_config(&CacheConfig::default()).unwrap(), policy);
    }

    #[test]
    fn test_policy_rejects_overflowing_ttl() {
        let config = CacheConfig {
            analysis_ttl_hours: u64::MAX / 2,
            ..CacheConfig::default()
        };
        assert!(matches!(
            TtlPolicy::from_config(&config),
            Err(ForgeError::Config(_))
        ));
    }

    #[test]
    fn test_ttl_class_roundtrip_names() {
        for class in [
            TtlClass::Analysis,
            TtlClass::Stage,
            TtlClass::Company,
            TtlClass::Competitor,
            TtlClass::Industry,
        ] {
            assert_eq!(TtlClass::parse(class.as_str()).unwrap(), class);
        }
        assert!(TtlClass::parse("forever").is_err());
    }
}
