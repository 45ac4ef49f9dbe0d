//! Complexity Scoring
//!
//! Explainable weighted score in `[0, 1]` used to pick a model tier.
//!
//! ```text
//! score = clamp(base(task)
//!               + data_weight * min(n, saturation) / saturation
//!               + reasoning_weight * reasoning
//!               + creativity_weight * creativity, 0, 1)
//! ```
//!
//! Every weight is non-negative, so the score never decreases when a flag
//! is switched on or when more data becomes available.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::complexity as defaults;
use crate::types::{ForgeError, Result};

// =============================================================================
// Task Types
// =============================================================================

/// Kinds of work the router knows how to place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DataExtraction,
    GapAnalysis,
    StrategicPlanning,
    CompetitiveAnalysis,
    RiskAssessment,
    Polish,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::DataExtraction,
        TaskType::GapAnalysis,
        TaskType::StrategicPlanning,
        TaskType::CompetitiveAnalysis,
        TaskType::RiskAssessment,
        TaskType::Polish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataExtraction => "data_extraction",
            Self::GapAnalysis => "gap_analysis",
            Self::StrategicPlanning => "strategic_planning",
            Self::CompetitiveAnalysis => "competitive_analysis",
            Self::RiskAssessment => "risk_assessment",
            Self::Polish => "polish",
        }
    }

    /// Intrinsic difficulty before data and flags are considered
    pub fn default_base(&self) -> f64 {
        match self {
            Self::DataExtraction => 0.05,
            Self::GapAnalysis => 0.20,
            Self::StrategicPlanning => 0.30,
            Self::CompetitiveAnalysis => 0.20,
            Self::RiskAssessment => 0.15,
            Self::Polish => 0.10,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ForgeError::Routing(format!("Unknown task type: {}", s)))
    }
}

// =============================================================================
// Weights
// =============================================================================

/// Tunable weights for the complexity formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityWeights {
    pub data_weight: f64,
    pub data_saturation: usize,
    pub reasoning_weight: f64,
    pub creativity_weight: f64,
    /// Per-task base overrides keyed by task type name
    pub base_overrides: BTreeMap<String, f64>,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            data_weight: defaults::DATA_WEIGHT,
            data_saturation: defaults::DATA_SATURATION,
            reasoning_weight: defaults::REASONING_WEIGHT,
            creativity_weight: defaults::CREATIVITY_WEIGHT,
            base_overrides: BTreeMap::new(),
        }
    }
}

impl ComplexityWeights {
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("data_weight", self.data_weight),
            ("reasoning_weight", self.reasoning_weight),
            ("creativity_weight", self.creativity_weight),
        ];
        for (name, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(ForgeError::Config(format!(
                    "routing.weights.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.data_saturation == 0 {
            return Err(ForgeError::Config(
                "routing.weights.data_saturation must be greater than 0".to_string(),
            ));
        }
        for (task, base) in &self.base_overrides {
            TaskType::from_str(task)
                .map_err(|_| ForgeError::Config(format!("Unknown task type in base_overrides: {}", task)))?;
            if !(0.0..=1.0).contains(base) {
                return Err(ForgeError::Config(format!(
                    "Base complexity for {} must be within [0, 1], got {}",
                    task, base
                )));
            }
        }
        Ok(())
    }

    fn base_for(&self, task: TaskType) -> f64 {
        self.base_overrides
            .get(task.as_str())
            .copied()
            .unwrap_or_else(|| task.default_base())
    }
}

// =============================================================================
// Scorer
// =============================================================================

/// Deterministic complexity scorer
#[derive(Debug, Clone, Default)]
pub struct ComplexityScorer {
    weights: ComplexityWeights,
}

impl ComplexityScorer {
    pub fn new(weights: ComplexityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ComplexityWeights {
        &self.weights
    }

    /// Score a task. Always within `[0, 1]`.
    pub fn score(
        &self,
        task: TaskType,
        data_available: usize,
        requires_reasoning: bool,
        requires_creativity: bool,
    ) -> f64 {
        let w = &self.weights;
        let saturation = w.data_saturation.max(1);
        let data_fraction = data_available.min(saturation) as f64 / saturation as f64;

        let mut score = w.base_for(task) + w.data_weight * data_fraction;
        if requires_reasoning {
            score += w.reasoning_weight;
        }
        if requires_creativity {
            score += w.creativity_weight;
        }
        score.clamp(0.0, 1.0)
    }

    /// Score a task given by name. Unknown names are a routing error.
    pub fn score_named(
        &self,
        task: &str,
        data_available: usize,
        requires_reasoning: bool,
        requires_creativity: bool,
    ) -> Result<f64> {
        let task = TaskType::from_str(task)?;
        Ok(self.score(task, data_available, requires_reasoning, requires_creativity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task_strategy() -> impl Strategy<Value = TaskType> {
        prop::sample::select(TaskType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn reasoning_flag_never_lowers_score(
            task in task_strategy(),
            n in 0usize..200,
            creativity in any::<bool>(),
        ) {
            let scorer = ComplexityScorer::default();
            let off = scorer.score(task, n, false, creativity);
            let on = scorer.score(task, n, true, creativity);
            prop_assert!(on >= off);
        }

        #[test]
        fn creativity_flag_never_lowers_score(
            task in task_strategy(),
            n in 0usize..200,
            reasoning in any::<bool>(),
        ) {
            let scorer = ComplexityScorer::default();
            let off = scorer.score(task, n, reasoning, false);
            let on = scorer.score(task, n, reasoning, true);
            prop_assert!(on >= off);
        }

        #[test]
        fn score_is_bounded_and_non_decreasing_in_data(
            task in task_strategy(),
            n in 0usize..200,
            reasoning in any::<bool>(),
            creativity in any::<bool>(),
        ) {
            let scorer = ComplexityScorer::default();
            let a = scorer.score(task, n, reasoning, creativity);
            let b = scorer.score(task, n + 1, reasoning, creativity);
            prop_assert!((0.0..=1.0).contains(&a));
            prop_assert!(b >= a);
        }
    }

    #[test]
    fn test_data_term_saturates() {
        let scorer = ComplexityScorer::default();
        let at = scorer.score(TaskType::GapAnalysis, 40, false, false);
        let beyond = scorer.score(TaskType::GapAnalysis, 4_000, false, false);
        assert_eq!(at, beyond);
    }

    #[test]
    fn test_score_clamps_at_one() {
        let mut weights = ComplexityWeights::default();
        weights.reasoning_weight = 0.9;
        let scorer = ComplexityScorer::new(weights);
        assert_eq!(scorer.score(TaskType::StrategicPlanning, 100, true, true), 1.0);
    }

    #[test]
    fn test_base_override() {
        let mut weights = ComplexityWeights::default();
        weights
            .base_overrides
            .insert("polish".to_string(), 0.5);
        let scorer = ComplexityScorer::new(weights);
        assert!((scorer.score(TaskType::Polish, 0, false, false) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_task_is_routing_error() {
        let scorer = ComplexityScorer::default();
        let err = scorer.score_named("astrology", 3, false, false).unwrap_err();
        assert!(matches!(err, ForgeError::Routing(_)));
    }

    #[test]
    fn test_task_type_parsing() {
        assert_eq!(
            "strategic-planning".parse::<TaskType>().unwrap(),
            TaskType::StrategicPlanning
        );
        assert_eq!(" Polish ".parse::<TaskType>().unwrap(), TaskType::Polish);
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut weights = ComplexityWeights::default();
        weights.creativity_weight = -0.1;
        assert!(weights.validate().is_err());

        let mut weights = ComplexityWeights::default();
        weights.base_overrides.insert("nope".to_string(), 0.1);
        assert!(weights.validate().is_err());
    }
}
