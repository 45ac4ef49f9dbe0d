//! Configuration Management
//!
//! Hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/stratforge/config.toml)
//! 3. Project config (.stratforge/config.toml)
//! 4. Environment variables (STRATFORGE_*)
//! 5. CLI arguments (highest priority)

mod loader;
mod types;

pub use loader::{ConfigLoader, PROJECT_DIR};
pub use types::*;
