use console::style;
use serde::Serialize;

use crate::types::Result;

/// Terminal output helpers shared by the commands
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(format: &str) -> Self {
        Self {
            json: format.eq_ignore_ascii_case("json"),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// Aligned `label: value` line
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {:<18} {}", style(format!("{}:", label)).dim(), value);
    }

    pub fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new("text")
    }
}
