//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/stratforge/) and project (.stratforge/) level configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{cache as cache_defaults, network, pipeline as pipeline_defaults};
use crate::routing::{
    BandThresholds, ComplexityWeights, ModelConfig, ModelTier, TaskType, default_catalog,
    default_floors, validate_catalog,
};
use crate::types::{ForgeError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Model endpoint settings
    pub llm: LlmConfig,

    /// Cache tier settings
    pub cache: CacheConfig,

    /// Model routing settings
    pub routing: RoutingConfig,

    /// Stage execution settings
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            cache: CacheConfig::default(),
            routing: RoutingConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `ForgeError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ForgeError::Config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(ForgeError::Config(
                "LLM timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.cache.validate()?;
        self.routing.validate()?;
        self.pipeline.validate()?;

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

/// OpenAI-compatible endpoint settings. The model itself is chosen by the router.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat-completions API
    pub api_base: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Inline API key. Never serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// HTTP request timeout
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_base", &self.api_base)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite database path. Defaults to `.stratforge/stratforge.db`.
    pub database_path: Option<PathBuf>,
    pub analysis_ttl_hours: u64,
    pub stage_ttl_hours: u64,
    pub memory: MemoryTtlConfig,
    /// Characters of normalized challenge text in the run key
    pub challenge_snippet_chars: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            analysis_ttl_hours: cache_defaults::ANALYSIS_TTL_HOURS,
            stage_ttl_hours: cache_defaults::STAGE_TTL_HOURS,
            memory: MemoryTtlConfig::default(),
            challenge_snippet_chars: cache_defaults::CHALLENGE_SNIPPET_CHARS,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        let max_days = cache_defaults::MAX_TTL_DAYS;
        let ttls = [
            ("analysis_ttl_hours", self.analysis_ttl_hours, max_days * 24),
            ("stage_ttl_hours", self.stage_ttl_hours, max_days * 24),
            ("memory.company_days", self.memory.company_days, max_days),
            ("memory.competitor_days", self.memory.competitor_days, max_days),
            ("memory.industry_days", self.memory.industry_days, max_days),
        ];
        for (name, value, max) in ttls {
            if value == 0 {
                return Err(ForgeError::Config(format!(
                    "cache.{} must be greater than 0",
                    name
                )));
            }
            if value > max {
                return Err(ForgeError::Config(format!(
                    "cache.{} must be at most {} ({} days), got {}",
                    name, max, max_days, value
                )));
            }
        }
        if self.challenge_snippet_chars == 0 {
            return Err(ForgeError::Config(
                "cache.challenge_snippet_chars must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn analysis_ttl(&self) -> Result<Duration> {
        ttl_secs("analysis_ttl_hours", self.analysis_ttl_hours, HOUR)
    }

    pub fn stage_ttl(&self) -> Result<Duration> {
        ttl_secs("stage_ttl_hours", self.stage_ttl_hours, HOUR)
    }
}

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

fn ttl_secs(name: &str, value: u64, unit_secs: u64) -> Result<Duration> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| ForgeError::Config(format!("cache.{} is out of range: {}", name, value)))
}

/// Institutional memory TTLs per entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTtlConfig {
    pub company_days: u64,
    pub competitor_days: u64,
    pub industry_days: u64,
}

impl MemoryTtlConfig {
    pub fn company_ttl(&self) -> Result<Duration> {
        ttl_secs("memory.company_days", self.company_days, DAY)
    }

    pub fn competitor_ttl(&self) -> Result<Duration> {
        ttl_secs("memory.competitor_days", self.competitor_days, DAY)
    }

    pub fn industry_ttl(&self) -> Result<Duration> {
        ttl_secs("memory.industry_days", self.industry_days, DAY)
    }
}

impl Default for MemoryTtlConfig {
    fn default() -> Self {
        Self {
            company_days: cache_defaults::COMPANY_TTL_DAYS,
            competitor_days: cache_defaults::COMPETITOR_TTL_DAYS,
            industry_days: cache_defaults::INDUSTRY_TTL_DAYS,
        }
    }
}

// =============================================================================
// Routing Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub thresholds: BandThresholds,
    /// Minimum tier per task type name
    pub floors: BTreeMap<String, ModelTier>,
    pub weights: ComplexityWeights,
    pub models: Vec<ModelConfig>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            thresholds: BandThresholds::default(),
            floors: default_floors(),
            weights: ComplexityWeights::default(),
            models: default_catalog(),
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        self.weights.validate()?;
        for task in self.floors.keys() {
            task.parse::<TaskType>()
                .map_err(|_| ForgeError::Config(format!("Unknown task type in floors: {}", task)))?;
        }
        validate_catalog(&self.models)
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Attempts per stage, including the strict retry
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub stage_timeout_secs: u64,
    pub cache_io_timeout_secs: u64,
    /// Concurrent runs for batch submission
    pub batch_concurrency: usize,
    /// Per-stage overrides keyed by stage name
    pub stages: BTreeMap<String, StageOverride>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: pipeline_defaults::MAX_ATTEMPTS,
            base_delay_ms: pipeline_defaults::BASE_DELAY_MS,
            max_delay_ms: pipeline_defaults::MAX_DELAY_MS,
            stage_timeout_secs: pipeline_defaults::STAGE_TIMEOUT_SECS,
            cache_io_timeout_secs: pipeline_defaults::CACHE_IO_TIMEOUT_SECS,
            batch_concurrency: pipeline_defaults::BATCH_CONCURRENCY,
            stages: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ForgeError::Config(
                "pipeline.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.stage_timeout_secs == 0 || self.cache_io_timeout_secs == 0 {
            return Err(ForgeError::Config(
                "pipeline timeouts must be greater than 0".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ForgeError::Config(format!(
                "pipeline.base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.batch_concurrency == 0 {
            return Err(ForgeError::Config(
                "pipeline.batch_concurrency must be greater than 0".to_string(),
            ));
        }
        for (stage, over) in &self.stages {
            stage.parse::<crate::pipeline::Stage>().map_err(|_| {
                ForgeError::Config(format!("Unknown stage in pipeline.stages: {}", stage))
            })?;
            if over.max_attempts == Some(0) || over.timeout_secs == Some(0) {
                return Err(ForgeError::Config(format!(
                    "pipeline.stages.{} overrides must be greater than 0",
                    stage
                )));
            }
        }
        Ok(())
    }
}

/// Per-stage retry and timeout override
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOverride {
    pub max_attempts: Option<u32>,
    pub timeout_secs: Option<u64>,
}
