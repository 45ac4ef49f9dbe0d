//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/stratforge/config.toml)
//! 3. Project config (.stratforge/config.toml)
//! 4. Environment variables (STRATFORGE_* prefix, `__` separates sections)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::constants::cache::DATABASE_FILE;
use crate::types::{ForgeError, Result};

/// Project data directory name
pub const PROJECT_DIR: &str = ".stratforge";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // STRATFORGE_CACHE__STAGE_TTL_HOURS -> cache.stage_ttl_hours
        figment = figment.merge(Env::prefixed("STRATFORGE_").split("__").lowercase(true));

        Self::extract(figment)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Config> {
        let config: Config = figment
            .extract()
            .map_err(|e| ForgeError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/stratforge/)
    pub fn global_dir() -> Option<PathBuf> {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(|p| PathBuf::from(p).join("stratforge"))
            .or_else(|| {
                directories::ProjectDirs::from("", "", "stratforge")
                    .map(|dirs| dirs.config_dir().to_path_buf())
            })
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    /// Get project data directory
    pub fn project_dir() -> PathBuf {
        PathBuf::from(PROJECT_DIR)
    }

    /// Database path from config, falling back to the project directory
    pub fn database_path(config: &Config) -> PathBuf {
        config
            .cache
            .database_path
            .clone()
            .unwrap_or_else(|| Self::project_dir().join(DATABASE_FILE))
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Render the effective configuration
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| ForgeError::Config(e.to_string()))
        }
    }

    /// Initialize global configuration
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            ForgeError::Config("Cannot determine global config directory".to_string())
        })?;
        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join("config.toml");
        Self::write_template(&config_path, &Self::default_global_config(), force)?;
        Ok(config_path)
    }

    /// Initialize project configuration
    pub fn init_project(dir: &Path, force: bool) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let config_path = dir.join("config.toml");
        Self::write_template(&config_path, &Self::default_project_config(), force)?;
        Ok(config_path)
    }

    fn write_template(path: &Path, content: &str, force: bool) -> Result<()> {
        if path.exists() && !force {
            info!("Config exists: {}", path.display());
            return Ok(());
        }
        fs::write(path, content)?;
        info!("Created config: {}", path.display());
        Ok(())
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn default_global_config() -> String {
        r#"# stratforge global configuration
# Project settings in .stratforge/config.toml override these.

version = "1.0"

[llm]
api_base = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
temperature = 0.2
"#
        .to_string()
    }

    fn default_project_config() -> String {
        r#"# stratforge project configuration

version = "1.0"

[cache]
analysis_ttl_hours = 168
stage_ttl_hours = 72

[cache.memory]
company_days = 30
competitor_days = 7
industry_days = 3

[routing.floors]
strategic_planning = "premium"

[pipeline]
max_attempts = 2
stage_timeout_secs = 120
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[cache]
stage_ttl_hours = 12

[cache.memory]
industry_days = 1
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.cache.stage_ttl_hours, 12);
        assert_eq!(config.cache.memory.industry_days, 1);
        assert_eq!(config.cache.memory.company_days, 30);
        assert_eq!(config.routing.models.len(), 5);
    }

    #[test]
    fn test_load_from_file_validates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[pipeline]\nmax_attempts = 0\n").unwrap();

        let err = ConfigLoader::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }

    #[test]
    fn test_project_template_parses() {
        let dir = TempDir::new().unwrap();
        let path = ConfigLoader::init_project(dir.path(), false).unwrap();
        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.pipeline.stage_timeout_secs, 120);
    }

    #[test]
    fn test_init_project_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "version = \"custom\"\n").unwrap();

        ConfigLoader::init_project(dir.path(), false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "version = \"custom\"\n");

        ConfigLoader::init_project(dir.path(), true).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("[cache]"));
    }

    #[test]
    fn test_render_toml() {
        let rendered = ConfigLoader::render(&Config::default(), false).unwrap();
        assert!(rendered.contains("analysis_ttl_hours"));
        let json = ConfigLoader::render(&Config::default(), true).unwrap();
        assert!(json.contains("\"stage_ttl_hours\""));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert_eq!(
            ConfigLoader::database_path(&config),
            PathBuf::from(".stratforge/stratforge.db")
        );
    }
}
