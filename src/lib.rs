//! stratforge - Cost-Optimized Strategy Analysis Pipeline
//!
//! Runs a fixed six-stage analysis (extraction, gap analysis, strategy,
//! competitive, risk scoring, polish) for a company, reusing earlier work at
//! three granularities and routing each stage to the cheapest adequate model.
//!
//! ## Core Features
//!
//! - **Three-Tier Cache**: whole-run results, single stage outputs and
//!   per-entity institutional memory, each with its own TTL
//! - **Degrade on Failure**: cache faults turn into misses and skipped
//!   writes, never failed runs
//! - **Complexity Routing**: explainable complexity scores mapped onto five
//!   model tiers, with per-task floors
//! - **Bounded Retry**: one strict retry for malformed model output
//!
//! ## Quick Start
//!
//! ```ignore
//! use stratforge::{AnalysisRequest, CacheLayer, Config, PipelineOrchestrator};
//!
//! let config = ConfigLoader::load()?;
//! let db = Arc::new(Database::open("stratforge.db")?);
//! db.initialize()?;
//!
//! let orchestrator = PipelineOrchestrator::new(
//!     Arc::new(CacheLayer::from_config(&config, Arc::new(SqliteBackend::new(db.clone())))?),
//!     Arc::new(ModelRouter::from_config(&config.routing)?),
//!     StageRegistry::from_invoker(Arc::new(OpenAiInvoker::new(&config.llm)?)),
//!     Arc::new(SqliteRunStatusStore::new(db)),
//! );
//! let result = orchestrator
//!     .run(AnalysisRequest::new("Acme", "Tech", "scale ops", json!({})))
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: key derivation, tiered stores, institutional memory
//! - [`routing`]: complexity scoring and model selection
//! - [`pipeline`]: stages, retry, orchestrator, regeneration
//! - [`ai`]: model invocation, output extraction, metrics
//! - [`storage`]: SQLite persistence with connection pooling
//! - [`config`]: layered configuration

pub mod ai;
pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod routing;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::error::{ErrorCategory, ForgeError, ModelError, Result, ResultExt};
pub use types::request::{AnalysisRequest, StageIdentity};

// Storage
pub use storage::database::PoolConfig;
pub use storage::{
    Database, MemoryRunStatusStore, RunStatus, RunStatusRecord, RunStatusStore, SharedDatabase,
    SqliteRunStatusStore,
};

// =============================================================================
// Cache Re-exports
// =============================================================================

pub use cache::{
    CacheBackend, CacheKeyDeriver, CacheLayer, CacheStats, CacheTier, InstitutionalMemory,
    MemoryBackend, SqliteBackend, TieredStore,
};

// =============================================================================
// Routing Re-exports
// =============================================================================

pub use routing::{ComplexityScorer, ModelConfig, ModelRouter, ModelTier, TaskType};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{
    PipelineOrchestrator, PipelineResult, RegenerationController, RunMode, Stage, StageFunction,
    StageRegistry, StageResult,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    ModelInvoker, ModelResponse, OpenAiInvoker, RunMetrics, SharedInvoker, TimeoutConfig,
    TokenUsage, with_timeout,
};
