//! Pipeline value types: stage inputs and calls, stage and run results,
//! and the run state machine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::stage::Stage;
use crate::ai::{MetricsSummary, TokenUsage};
use crate::cache::MemoryRecord;
use crate::constants::pipeline as pipeline_constants;
use crate::routing::ModelConfig;
use crate::types::StageIdentity;

// =============================================================================
// Stage Call
// =============================================================================

/// Stage-specific inputs. Identity is carried separately by [`StageCall`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageInputs {
    pub challenge: String,
    pub extracted_data: Value,
    /// Outputs of all earlier stages in this run
    pub upstream: BTreeMap<Stage, Value>,
    /// Fresh institutional memory seeded into the stage
    pub memory: Option<MemoryRecord>,
    /// Open extension map for stage-specific inputs. Part of the stage key.
    pub extra: Map<String, Value>,
}

impl StageInputs {
    pub fn new(challenge: impl Into<String>, extracted_data: Value) -> Self {
        Self {
            challenge: challenge.into(),
            extracted_data,
            ..Self::default()
        }
    }
}

/// One invocation of a stage function.
///
/// `identity` is a required borrowed field, so no call path (fallback
/// included) can build a call without company and industry.
#[derive(Debug, Clone, Copy)]
pub struct StageCall<'a> {
    pub stage: Stage,
    pub identity: &'a StageIdentity,
    pub inputs: &'a StageInputs,
    pub model: &'a ModelConfig,
    /// 1-based attempt number
    pub attempt: u32,
    /// Retry with a stricter output instruction
    pub strict: bool,
    /// Running after a cache fault in this stage
    pub fallback: bool,
}

/// What a stage function returns
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub payload: Value,
    pub cost_usd: f64,
    pub usage: TokenUsage,
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageSource {
    Executed,
    StageCache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub output: Value,
    /// Cost of producing `output`, whether spent in this run or earlier
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub model_id: String,
    pub source: StageSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Fresh,
    AnalysisCache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub company: String,
    pub industry: String,
    pub challenge: String,
    /// All six stage results in execution order
    pub stages: Vec<StageResult>,
    pub report: Value,
    pub confidence: f64,
    /// Cost embodied in the stage outputs
    pub total_cost_usd: f64,
    /// Cost actually spent by the run that returned this result
    pub run_cost_usd: f64,
    pub source: ResultSource,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub metrics: MetricsSummary,
}

impl PipelineResult {
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn executed_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| r.source == StageSource::Executed)
            .count()
    }
}

/// `{company, industry, challenge, sections: {stage: output}, summary}`
pub fn build_report(identity: &StageIdentity, challenge: &str, stages: &[StageResult]) -> Value {
    let sections: Map<String, Value> = stages
        .iter()
        .map(|r| (r.stage.as_str().to_string(), r.output.clone()))
        .collect();
    let summary = stages
        .iter()
        .find(|r| r.stage == Stage::Polish)
        .map(|r| r.output.clone())
        .unwrap_or(Value::Null);

    json!({
        "company": identity.company,
        "industry": identity.industry,
        "challenge": challenge,
        "sections": sections,
        "summary": summary,
    })
}

/// Mean of stage-reported `confidence` values in `[0, 1]`
pub fn aggregate_confidence(stages: &[StageResult]) -> f64 {
    let values: Vec<f64> = stages
        .iter()
        .filter_map(|r| r.output.get("confidence").and_then(Value::as_f64))
        .filter(|c| (0.0..=1.0).contains(c))
        .collect();
    if values.is_empty() {
        pipeline_constants::DEFAULT_CONFIDENCE
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Run-level states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    CheckingAnalysisCache,
    ShortCircuited,
    RunningStages,
    Aggregating,
    Completed,
    Failed,
}

impl RunState {
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (*self, next),
            (NotStarted, CheckingAnalysisCache)
                | (NotStarted, RunningStages)
                | (CheckingAnalysisCache, ShortCircuited)
                | (CheckingAnalysisCache, RunningStages)
                | (ShortCircuited, Completed)
                | (RunningStages, Aggregating)
                | (RunningStages, Failed)
                | (Aggregating, Completed)
                | (Aggregating, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Per-stage states, including the fallback path taken on cache faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    CheckingStageCache,
    StageCacheHit,
    Executing,
    CacheErrorDuringExecution,
    FallbackExecuting,
    Executed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Normal,
    /// Skip the whole-run short-circuit, then overwrite the analysis entry
    Regenerate,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Regenerate => "regenerate",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(stage: Stage, output: Value) -> StageResult {
        StageResult {
            stage,
            output,
            cost_usd: 0.01,
            duration_ms: 5,
            model_id: "gpt-4o-mini".to_string(),
            source: StageSource::Executed,
        }
    }

    #[test]
    fn test_confidence_mean_ignores_out_of_range() {
        let stages = vec![
            result(Stage::Extraction, json!({"confidence": 0.8})),
            result(Stage::GapAnalysis, json!({"confidence": 0.4})),
            result(Stage::Strategy, json!({"confidence": 7})),
            result(Stage::Polish, json!({"summary": "x"})),
        ];
        assert!((aggregate_confidence(&stages) - 0.6).abs() < 1e-9);
        assert_eq!(aggregate_confidence(&[]), 0.5);
    }

    #[test]
    fn test_report_shape() {
        let identity = StageIdentity {
            company: "Acme".to_string(),
            industry: "Tech".to_string(),
        };
        let stages = vec![
            result(Stage::Extraction, json!({"a": 1})),
            result(Stage::Polish, json!({"executive_summary": "Grow"})),
        ];
        let report = build_report(&identity, "Scale ops", &stages);
        assert_eq!(report["company"], "Acme");
        assert_eq!(report["sections"]["extraction"]["a"], 1);
        assert_eq!(report["summary"]["executive_summary"], "Grow");
    }

    #[test]
    fn test_state_transitions() {
        use RunState::*;
        assert!(NotStarted.can_transition_to(CheckingAnalysisCache));
        assert!(CheckingAnalysisCache.can_transition_to(ShortCircuited));
        assert!(RunningStages.can_transition_to(Failed));
        assert!(!ShortCircuited.can_transition_to(RunningStages));
        assert!(!Completed.can_transition_to(RunningStages));
        assert!(Failed.is_terminal());
    }
}
