//! Run Command
//!
//! Analyze one request, or a JSON array of requests with `--batch`.
//!
//! Usage:
//!   stratforge run --company Acme --industry Tech --challenge "scale ops" [--data data.json]
//!   stratforge run --batch requests.json [-f json]

use std::path::Path;

use serde_json::Value;

use super::{RequestArgs, read_json};
use crate::cli::context::CommandContext;
use crate::cli::ui::Output;
use crate::pipeline::{PipelineResult, ResultSource, RunMode, Stage, StageSource};
use crate::types::{AnalysisRequest, ForgeError, Result};

pub async fn run(ctx: &CommandContext, args: RequestArgs, format: &str) -> Result<()> {
    let out = Output::new(format);
    let request = args.into_request()?;
    let orchestrator = ctx.orchestrator()?;

    let (run_id, handle) = orchestrator.submit(request, RunMode::Normal)?;
    if !out.is_json() {
        out.info(&format!("Run {} started", run_id));
    }

    let result = handle
        .await
        .map_err(|e| ForgeError::stage_execution("run", format!("run task aborted: {}", e)))??;
    print_result(&out, &result)
}

pub async fn run_batch(ctx: &CommandContext, path: &Path, format: &str) -> Result<()> {
    let out = Output::new(format);
    let requests = read_batch(path)?;
    let total = requests.len();
    let orchestrator = ctx.orchestrator()?;

    let outcomes = orchestrator.run_batch(requests, RunMode::Normal).await;
    let failed = outcomes.iter().filter(|o| o.is_err()).count();

    if out.is_json() {
        let rows: Vec<Value> = outcomes
            .iter()
            .map(|outcome| match outcome {
                Ok(result) => serde_json::to_value(result).unwrap_or(Value::Null),
                Err(e) => serde_json::json!({"error": e.to_string(), "stage": e.stage()}),
            })
            .collect();
        out.json(&rows)?;
    } else {
        out.header(&format!("Batch: {} requests", total));
        for (idx, outcome) in outcomes.iter().enumerate() {
            match outcome {
                Ok(result) => out.success(&format!(
                    "#{} {} ({}) confidence {:.2}, spent ${:.4} [{}]",
                    idx + 1,
                    result.company,
                    result.industry,
                    result.confidence,
                    result.run_cost_usd,
                    source_label(result.source)
                )),
                Err(e) => out.error(&format!("#{} {}", idx + 1, e)),
            }
        }
    }

    if failed > 0 {
        return Err(ForgeError::stage_execution(
            "batch",
            format!("{} of {} runs failed", failed, total),
        ));
    }
    Ok(())
}

/// Parse a JSON array of requests
pub fn read_batch(path: &Path) -> Result<Vec<AnalysisRequest>> {
    let value = read_json(path)?;
    if !value.is_array() {
        return Err(ForgeError::InvalidInput(format!(
            "{} must contain a JSON array of requests",
            path.display()
        )));
    }
    serde_json::from_value(value)
        .map_err(|e| ForgeError::InvalidInput(format!("Invalid batch request: {}", e)))
}

pub(crate) fn print_result(out: &Output, result: &PipelineResult) -> Result<()> {
    if out.is_json() {
        return out.json(result);
    }

    out.header(&format!("Analysis: {} ({})", result.company, result.industry));
    out.field("Run", &result.run_id);
    out.field("Source", source_label(result.source));
    out.field("Confidence", format!("{:.2}", result.confidence));
    out.field("Spent", format!("${:.4}", result.run_cost_usd));
    out.field("Embodied cost", format!("${:.4}", result.total_cost_usd));

    out.section("Stages");
    for stage in &result.stages {
        let source = match stage.source {
            StageSource::Executed => "executed",
            StageSource::StageCache => "cached",
        };
        println!(
            "  {:<14} {:<9} {:<22} ${:.4} {:>6}ms",
            stage.stage.as_str(),
            source,
            stage.model_id,
            stage.cost_usd,
            stage.duration_ms
        );
    }

    if let Some(summary) = result
        .stage(Stage::Polish)
        .and_then(|r| r.output.get("executive_summary"))
        .and_then(Value::as_str)
    {
        out.section("Executive Summary");
        println!("{}", summary);
    }

    if result.metrics.model_calls > 0 {
        println!();
        out.info(&result.metrics.display());
    }
    Ok(())
}

fn source_label(source: ResultSource) -> &'static str {
    match source {
        ResultSource::Fresh => "fresh",
        ResultSource::AnalysisCache => "analysis cache",
    }
}
