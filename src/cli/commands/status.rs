//! Status Command
//!
//! Show one run's persisted state, or the most recent runs.

use crate::cli::context::CommandContext;
use crate::cli::ui::Output;
use crate::storage::{RunStatus, RunStatusRecord};
use crate::types::{ForgeError, Result};

pub async fn run(
    ctx: &CommandContext,
    run_id: Option<&str>,
    limit: usize,
    format: &str,
) -> Result<()> {
    let out = Output::new(format);
    let store = ctx.run_status();

    let Some(run_id) = run_id else {
        let runs = store.recent_runs(limit).await?;
        if out.is_json() {
            return out.json(&runs);
        }
        if runs.is_empty() {
            out.info("No runs recorded yet.");
            return Ok(());
        }
        out.header("Recent Runs");
        for record in &runs {
            println!(
                "  {}  {:<9} {:<20} {:<16} {}",
                record.run_id,
                record.status.as_str(),
                record.company,
                record.industry,
                record.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        return Ok(());
    };

    let record = store
        .load_run_status(run_id)
        .await?
        .ok_or_else(|| ForgeError::NotFound(format!("run {}", run_id)))?;

    if out.is_json() {
        return out.json(&record);
    }
    print_record(&out, &record);
    Ok(())
}

fn print_record(out: &Output, record: &RunStatusRecord) {
    out.header(&format!("Run {}", record.run_id));
    out.field("Status", record.status);
    out.field("Company", &record.company);
    out.field("Industry", &record.industry);
    out.field("Started", record.started_at.to_rfc3339());
    out.field("Updated", record.updated_at.to_rfc3339());

    match record.status {
        RunStatus::Failed => {
            out.field("Failed stage", record.error_stage.as_deref().unwrap_or("-"));
            out.field("Error", record.error_detail.as_deref().unwrap_or("-"));
        }
        RunStatus::Completed => {
            if let Some(confidence) = record
                .result
                .as_ref()
                .and_then(|r| r.get("confidence"))
                .and_then(|c| c.as_f64())
            {
                out.field("Confidence", format!("{:.2}", confidence));
            }
        }
        RunStatus::Running => {}
    }
}
