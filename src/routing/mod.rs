//! Complexity-aware model routing
//!
//! - `complexity`: explainable score in `[0, 1]` from task features
//! - `router`: score bands, task floors and the five-tier model catalog

pub mod complexity;
pub mod router;

pub use complexity::{ComplexityScorer, ComplexityWeights, TaskType};
pub use router::{
    BandThresholds, ModelConfig, ModelRouter, ModelTier, PlannedRoute, RoutingDecision,
    RoutingPlan, count_data_points, default_catalog, default_floors, validate_catalog,
};
