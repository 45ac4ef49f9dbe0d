//! Model Router
//!
//! Maps `(task type, complexity score)` onto one of five cost/capability
//! tiers. Threshold bands pick a tier from the score; per-task floors raise
//! it when a task type must never run on a cheaper model.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::complexity::{ComplexityScorer, TaskType};
use crate::ai::provider::TokenUsage;
use crate::config::RoutingConfig;
use crate::constants::routing as bands;
use crate::pipeline::stage::Stage;
use crate::types::{ForgeError, Result};

// =============================================================================
// Tiers and Model Configuration
// =============================================================================

/// Cost/capability band, ordered from cheapest to most capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    UltraCheap,
    Cheap,
    Mid,
    Premium,
    Reasoning,
}

impl ModelTier {
    pub const ALL: [ModelTier; 5] = [
        ModelTier::UltraCheap,
        ModelTier::Cheap,
        ModelTier::Mid,
        ModelTier::Premium,
        ModelTier::Reasoning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UltraCheap => "ultra_cheap",
            Self::Cheap => "cheap",
            Self::Mid => "mid",
            Self::Premium => "premium",
            Self::Reasoning => "reasoning",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ModelTier::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ForgeError::Routing(format!("Unknown model tier: {}", s)))
    }
}

/// A concrete model the pipeline can invoke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub tier: ModelTier,
    /// Blended USD cost per million tokens (input + output)
    pub cost_per_million_tokens: f64,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelConfig {
    pub fn new(
        model_id: impl Into<String>,
        tier: ModelTier,
        cost_per_million_tokens: f64,
        capabilities: &[&str],
    ) -> Self {
        Self {
            model_id: model_id.into(),
            tier,
            cost_per_million_tokens,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Estimated USD cost of a call with the given usage
    pub fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        usage.total() as f64 * self.cost_per_million_tokens / 1_000_000.0
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Built-in five-tier catalog
pub fn default_catalog() -> Vec<ModelConfig> {
    vec![
        ModelConfig::new(
            "gpt-4.1-nano",
            ModelTier::UltraCheap,
            0.25,
            &["extraction", "summarization"],
        ),
        ModelConfig::new(
            "gpt-4o-mini",
            ModelTier::Cheap,
            0.75,
            &["extraction", "summarization", "classification"],
        ),
        ModelConfig::new(
            "gpt-4.1-mini",
            ModelTier::Mid,
            2.0,
            &["extraction", "summarization", "classification", "analysis"],
        ),
        ModelConfig::new(
            "gpt-4.1",
            ModelTier::Premium,
            10.0,
            &[
                "extraction",
                "summarization",
                "classification",
                "analysis",
                "reasoning",
                "creativity",
            ],
        ),
        ModelConfig::new(
            "o3",
            ModelTier::Reasoning,
            20.0,
            &[
                "extraction",
                "summarization",
                "classification",
                "analysis",
                "reasoning",
                "creativity",
                "deep_reasoning",
            ],
        ),
    ]
}

/// Check catalog invariants: every tier present once, strictly increasing
/// cost, and each tier's capabilities a superset of the tier below.
pub fn validate_catalog(models: &[ModelConfig]) -> Result<()> {
    let mut by_tier: BTreeMap<ModelTier, &ModelConfig> = BTreeMap::new();
    for model in models {
        if model.model_id.trim().is_empty() {
            return Err(ForgeError::Config("Model id must not be empty".to_string()));
        }
        if !model.cost_per_million_tokens.is_finite() || model.cost_per_million_tokens < 0.0 {
            return Err(ForgeError::Config(format!(
                "Model {} has invalid cost {}",
                model.model_id, model.cost_per_million_tokens
            )));
        }
        if by_tier.insert(model.tier, model).is_some() {
            return Err(ForgeError::Config(format!(
                "Duplicate model for tier {}",
                model.tier
            )));
        }
    }

    for tier in ModelTier::ALL {
        if !by_tier.contains_key(&tier) {
            return Err(ForgeError::Config(format!("No model configured for tier {}", tier)));
        }
    }

    let ordered: Vec<&ModelConfig> = by_tier.values().copied().collect();
    for pair in ordered.windows(2) {
        let (lower, higher) = (pair[0], pair[1]);
        if higher.cost_per_million_tokens <= lower.cost_per_million_tokens {
            return Err(ForgeError::Config(format!(
                "Tier {} ({}) must cost more than tier {} ({})",
                higher.tier,
                higher.cost_per_million_tokens,
                lower.tier,
                lower.cost_per_million_tokens
            )));
        }
        if let Some(missing) = lower
            .capabilities
            .iter()
            .find(|cap| !higher.has_capability(cap))
        {
            return Err(ForgeError::Config(format!(
                "Tier {} lacks capability '{}' provided by tier {}",
                higher.tier, missing, lower.tier
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Score Bands
// =============================================================================

/// Exclusive upper bounds of each score band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandThresholds {
    pub ultra_cheap_below: f64,
    pub cheap_below: f64,
    pub mid_below: f64,
    pub premium_below: f64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            ultra_cheap_below: bands::ULTRA_CHEAP_BELOW,
            cheap_below: bands::CHEAP_BELOW,
            mid_below: bands::MID_BELOW,
            premium_below: bands::PREMIUM_BELOW,
        }
    }
}

impl BandThresholds {
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.ultra_cheap_below,
            self.cheap_below,
            self.mid_below,
            self.premium_below,
        ];
        if values.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(ForgeError::Config(
                "Routing thresholds must be within [0, 1]".to_string(),
            ));
        }
        if values.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ForgeError::Config(format!(
                "Routing thresholds must be strictly increasing, got {:?}",
                values
            )));
        }
        Ok(())
    }

    pub fn tier_for(&self, score: f64) -> ModelTier {
        if score < self.ultra_cheap_below {
            ModelTier::UltraCheap
        } else if score < self.cheap_below {
            ModelTier::Cheap
        } else if score < self.mid_below {
            ModelTier::Mid
        } else if score < self.premium_below {
            ModelTier::Premium
        } else {
            ModelTier::Reasoning
        }
    }
}

/// Default task floors
pub fn default_floors() -> BTreeMap<String, ModelTier> {
    BTreeMap::from([(
        TaskType::StrategicPlanning.as_str().to_string(),
        ModelTier::Premium,
    )])
}

// =============================================================================
// Router
// =============================================================================

/// Why a task landed on a tier
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub task: TaskType,
    pub score: f64,
    pub band: ModelTier,
    pub floor: Option<ModelTier>,
    pub tier: ModelTier,
    pub model_id: String,
    pub cost_per_million_tokens: f64,
}

/// Planned model for one stage
#[derive(Debug, Clone, Serialize)]
pub struct PlannedRoute {
    pub stage: Stage,
    pub score: f64,
    pub model: ModelConfig,
}

/// Model selection for all six stages, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct RoutingPlan {
    pub data_available: usize,
    pub routes: Vec<PlannedRoute>,
}

impl RoutingPlan {
    pub fn get(&self, stage: Stage) -> Option<&ModelConfig> {
        self.routes
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.model)
    }

    /// Stage name to model mapping
    pub fn by_stage_name(&self) -> BTreeMap<&'static str, &ModelConfig> {
        self.routes
            .iter()
            .map(|r| (r.stage.as_str(), &r.model))
            .collect()
    }
}

/// Deterministic tier selection over a validated catalog
#[derive(Debug, Clone)]
pub struct ModelRouter {
    catalog: BTreeMap<ModelTier, ModelConfig>,
    thresholds: BandThresholds,
    floors: HashMap<TaskType, ModelTier>,
    scorer: ComplexityScorer,
}

impl ModelRouter {
    pub fn from_config(config: &RoutingConfig) -> Result<Self> {
        config.validate()?;

        let mut floors = HashMap::new();
        for (task, tier) in &config.floors {
            floors.insert(TaskType::from_str(task)?, *tier);
        }

        Ok(Self {
            catalog: config
                .models
                .iter()
                .map(|m| (m.tier, m.clone()))
                .collect(),
            thresholds: config.thresholds,
            floors,
            scorer: ComplexityScorer::new(config.weights.clone()),
        })
    }

    pub fn scorer(&self) -> &ComplexityScorer {
        &self.scorer
    }

    pub fn catalog(&self) -> impl Iterator<Item = &ModelConfig> {
        self.catalog.values()
    }

    /// Resolve the tier for a task, applying its floor
    pub fn explain(&self, task: TaskType, score: f64) -> Result<RoutingDecision> {
        let band = self.thresholds.tier_for(score);
        let floor = self.floors.get(&task).copied();
        let tier = floor.map_or(band, |f| band.max(f));

        let model = self.catalog.get(&tier).ok_or_else(|| {
            ForgeError::Routing(format!("No model configured for tier {}", tier))
        })?;

        Ok(RoutingDecision {
            task,
            score,
            band,
            floor,
            tier,
            model_id: model.model_id.clone(),
            cost_per_million_tokens: model.cost_per_million_tokens,
        })
    }

    /// Select the model for a task at the given complexity
    pub fn select(&self, task: TaskType, score: f64) -> Result<ModelConfig> {
        let decision = self.explain(task, score)?;
        debug!(
            task = %task,
            score,
            band = %decision.band,
            tier = %decision.tier,
            "Routed task to {}",
            decision.model_id
        );
        self.catalog
            .get(&decision.tier)
            .cloned()
            .ok_or_else(|| ForgeError::Routing(format!("No model for tier {}", decision.tier)))
    }

    /// Select by task type name. Unknown names are a routing error.
    pub fn select_by_name(&self, task: &str, score: f64) -> Result<ModelConfig> {
        self.select(TaskType::from_str(task)?, score)
    }

    /// Precompute the model for every stage from one scan of the payload
    pub fn recommend_for_stages(&self, extracted_data: &Value) -> Result<RoutingPlan> {
        let data_available = count_data_points(extracted_data);
        let routes = Stage::ALL
            .into_iter()
            .map(|stage| {
                let profile = stage.profile();
                let score = self.scorer.score(
                    profile.task,
                    data_available,
                    profile.requires_reasoning,
                    profile.requires_creativity,
                );
                Ok(PlannedRoute {
                    stage,
                    score,
                    model: self.select(profile.task, score)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RoutingPlan {
            data_available,
            routes,
        })
    }
}

/// Count non-null, non-empty leaf values in a payload
pub fn count_data_points(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) if s.trim().is_empty() => 0,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => 1,
        Value::Array(items) => items.iter().map(count_data_points).sum(),
        Value::Object(map) => map.values().map(count_data_points).sum(),
    }
}
