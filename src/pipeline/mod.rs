//! Strategy analysis pipeline
//!
//! Six fixed stages run in order for each request:
//!
//! ```text
//! extraction → gap_analysis → strategy → competitive → risk_scoring → polish
//! ```
//!
//! - `stage`: stage catalog (routing profile, prompt, output schema)
//! - `function`: stage function trait and the model-backed default
//! - `retry`: bounded retry with a strict second attempt
//! - `orchestrator`: cache-aware run state machine
//! - `regenerate`: rerun that bypasses the whole-run cache

pub mod function;
pub mod orchestrator;
pub mod regenerate;
pub mod retry;
pub mod stage;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use function::{ModelStage, SharedStageFunction, StageFunction, StageRegistry};
pub use orchestrator::PipelineOrchestrator;
pub use regenerate::RegenerationController;
pub use retry::RetryPolicy;
pub use stage::{Stage, StageProfile};
pub use types::{
    PipelineResult, ResultSource, RunMode, RunState, StageCall, StageInputs, StageOutput,
    StagePhase, StageResult, StageSource, aggregate_confidence, build_report,
};
