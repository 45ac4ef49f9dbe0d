pub mod commands;
pub mod context;
pub mod ui;

pub use context::{CommandContext, load_config};
