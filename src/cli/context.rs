//! CLI Command Context
//!
//! Shared initialization for commands: configuration, database, cache
//! layer and the orchestrator built on top of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::ai::OpenAiInvoker;
use crate::cache::{CacheLayer, SqliteBackend};
use crate::config::{Config, ConfigLoader};
use crate::pipeline::{PipelineOrchestrator, RegenerationController, StageRegistry};
use crate::routing::ModelRouter;
use crate::storage::{Database, SharedDatabase, SharedRunStatus, SqliteRunStatusStore};
use crate::types::Result;

/// Resources every data command needs
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub db: SharedDatabase,
    pub db_path: PathBuf,
}

impl CommandContext {
    /// Load configuration (an explicit file replaces the layered lookup)
    /// and open the database, creating its schema if needed.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let db_path = ConfigLoader::database_path(&config);
        debug!("Opening database at {}", db_path.display());

        let db = Database::open(&db_path)?;
        db.initialize()?;

        Ok(Self {
            config,
            db: Arc::new(db),
            db_path,
        })
    }

    pub fn cache_layer(&self) -> Result<CacheLayer> {
        CacheLayer::from_config(&self.config, Arc::new(SqliteBackend::new(self.db.clone())))
    }

    pub fn router(&self) -> Result<ModelRouter> {
        ModelRouter::from_config(&self.config.routing)
    }

    pub fn run_status(&self) -> SharedRunStatus {
        Arc::new(SqliteRunStatusStore::new(self.db.clone()))
    }

    /// Orchestrator backed by the configured OpenAI-compatible endpoint
    pub fn orchestrator(&self) -> Result<Arc<PipelineOrchestrator>> {
        let invoker = OpenAiInvoker::new(&self.config.llm)?;
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(self.cache_layer()?),
            Arc::new(self.router()?),
            StageRegistry::from_invoker(Arc::new(invoker)),
            self.run_status(),
        )
        .with_config(
            self.config.pipeline.clone(),
            self.config.cache.challenge_snippet_chars,
        );
        Ok(Arc::new(orchestrator))
    }

    pub fn regeneration(&self) -> Result<RegenerationController> {
        Ok(RegenerationController::new(self.orchestrator()?))
    }
}

/// Configuration without touching the database
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}
