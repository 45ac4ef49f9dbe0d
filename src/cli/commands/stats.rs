//! Stats Command
//!
//! Per-tier record counts, hits and estimated savings.

use crate::cli::context::CommandContext;
use crate::cli::ui::Output;
use crate::types::Result;

pub async fn run(ctx: &CommandContext, format: &str) -> Result<()> {
    let out = Output::new(format);
    let stats = ctx.cache_layer()?.stats().await;

    if out.is_json() {
        return out.json(&stats);
    }

    out.header("Cache Statistics");
    out.field("Database", ctx.db_path.display());
    out.field("Total records", stats.total_records);
    out.field(
        "Cost saved",
        format!("${:.4}", stats.estimated_total_cost_saved),
    );

    out.section("Tiers");
    for (tier, records) in &stats.records_by_tier {
        let hits = stats.hit_count_by_tier.get(tier).copied().unwrap_or(0);
        println!("  {:<10} {:>8} records {:>8} hits", tier, records, hits);
    }
    Ok(())
}
