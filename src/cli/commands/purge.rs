//! Purge Command
//!
//! Physically delete expired cache entries. Safe to run repeatedly.

use crate::cli::context::CommandContext;
use crate::cli::ui::Output;
use crate::types::Result;

pub async fn run(ctx: &CommandContext, format: &str) -> Result<()> {
    let out = Output::new(format);
    let report = ctx.cache_layer()?.purge_expired().await?;

    if out.is_json() {
        return out.json(&report);
    }

    if report.total() == 0 {
        out.info("No expired entries.");
        return Ok(());
    }
    for (tier, removed) in &report.by_tier {
        out.field(tier, removed);
    }
    out.success(&format!("Purged {} expired entries", report.total()));
    Ok(())
}
