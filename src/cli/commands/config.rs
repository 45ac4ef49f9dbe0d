//! Config Command
//!
//! Manage stratforge configuration.
//!
//! Usage:
//!   stratforge config show [-f json]
//!   stratforge config path
//!   stratforge config init [-g] [--force]

use std::path::Path;

use crate::cli::context::load_config;
use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show the effective (merged) configuration
pub fn show(config_path: Option<&Path>, format: &str) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{}", ConfigLoader::render(&config, format == "json")?);
    Ok(())
}

/// Show configuration file paths
pub fn path() -> Result<()> {
    let out = Output::default();
    match ConfigLoader::global_config_path() {
        Some(global) => out.field(
            "Global",
            format!("{}{}", global.display(), exists_marker(&global)),
        ),
        None => out.field("Global", "(no config directory)"),
    }
    let project = ConfigLoader::project_config_path();
    out.field(
        "Project",
        format!("{}{}", project.display(), exists_marker(&project)),
    );
    if let Ok(config) = load_config(None) {
        out.field("Database", ConfigLoader::database_path(&config).display());
    }
    out.field("Environment", "STRATFORGE_<SECTION>__<KEY>");
    Ok(())
}

fn exists_marker(path: &Path) -> &'static str {
    if path.exists() { "" } else { " (not found)" }
}

/// Initialize global or project configuration
pub fn init(global: bool, force: bool) -> Result<()> {
    let out = Output::default();
    let path = if global {
        ConfigLoader::init_global(force)?
    } else {
        ConfigLoader::init_project(&ConfigLoader::project_dir(), force)?
    };
    out.success(&format!(
        "Initialized {} configuration",
        if global { "global" } else { "project" }
    ));
    out.field("Config", path.display());
    Ok(())
}
