//! Route Command
//!
//! Audit routing decisions without running anything.
//!
//! Usage:
//!   stratforge route [--data data.json]        plan for all six stages
//!   stratforge route --task gap_analysis --score 0.45

use std::path::Path;

use serde_json::Value;

use super::read_json;
use crate::cli::ui::Output;
use crate::config::Config;
use crate::routing::{ModelRouter, RoutingDecision, RoutingPlan, TaskType};
use crate::types::{ForgeError, Result};

pub fn run(
    config: &Config,
    task: Option<&str>,
    score: Option<f64>,
    data: Option<&Path>,
    format: &str,
) -> Result<()> {
    let out = Output::new(format);
    let router = ModelRouter::from_config(&config.routing)?;

    match (task, score) {
        (Some(task), Some(score)) => {
            let decision = explain(&router, task, score)?;
            if out.is_json() {
                return out.json(&decision);
            }
            print_decision(&out, &decision);
        }
        (None, None) => {
            let extracted = match data {
                Some(path) => read_json(path)?,
                None => Value::Object(Default::default()),
            };
            let plan = router.recommend_for_stages(&extracted)?;
            if out.is_json() {
                return out.json(&plan);
            }
            print_plan(&out, &plan);
        }
        _ => {
            return Err(ForgeError::InvalidInput(
                "--task and --score must be given together".to_string(),
            ));
        }
    }
    Ok(())
}

fn explain(router: &ModelRouter, task: &str, score: f64) -> Result<RoutingDecision> {
    if !(0.0..=1.0).contains(&score) {
        return Err(ForgeError::InvalidInput(format!(
            "score must be between 0 and 1, got {}",
            score
        )));
    }
    router.explain(task.parse::<TaskType>()?, score)
}

fn print_decision(out: &Output, decision: &RoutingDecision) {
    out.header(&format!("Routing: {}", decision.task));
    out.field("Score", format!("{:.3}", decision.score));
    out.field("Band", decision.band);
    out.field(
        "Floor",
        decision
            .floor
            .map_or_else(|| "-".to_string(), |f| f.to_string()),
    );
    out.field("Tier", decision.tier);
    out.field(
        "Model",
        format!(
            "{} (${:.2}/M tokens)",
            decision.model_id, decision.cost_per_million_tokens
        ),
    );
}

fn print_plan(out: &Output, plan: &RoutingPlan) {
    out.header(&format!("Routing plan ({} data points)", plan.data_available));
    for route in &plan.routes {
        println!(
            "  {:<14} {:>6.3}  {:<12} {}",
            route.stage.as_str(),
            route.score,
            route.model.tier.as_str(),
            route.model.model_id
        );
    }
}
