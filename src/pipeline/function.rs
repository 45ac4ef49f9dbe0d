//! Stage functions: the collaborators that turn a stage call into output.
//!
//! The default [`ModelStage`] renders the stage prompt, invokes the routed
//! model and extracts a JSON object from the reply. Tests swap in their own
//! implementations through [`StageRegistry`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::stage::Stage;
use super::types::{StageCall, StageOutput};
use crate::ai::{SharedInvoker, extract_structured};
use crate::types::{ForgeError, Result};

const STRICT_OUTPUT_INSTRUCTION: &str = r#"

<OUTPUT_RULES>
Your previous answer could not be parsed. Respond with ONLY one JSON object.
- No prose before or after the object
- No markdown code fences
- No comments or trailing commas
- Every required field present, including "confidence"
</OUTPUT_RULES>"#;

#[async_trait]
pub trait StageFunction: Send + Sync {
    /// Produce the stage output. Malformed model output must surface as
    /// [`ForgeError::TransientStage`] so the caller can retry strictly.
    async fn call(&self, call: StageCall<'_>) -> Result<StageOutput>;
}

pub type SharedStageFunction = Arc<dyn StageFunction>;

// =============================================================================
// Model-backed stage
// =============================================================================

pub struct ModelStage {
    invoker: SharedInvoker,
}

impl ModelStage {
    pub fn new(invoker: SharedInvoker) -> Self {
        Self { invoker }
    }

    fn render(call: &StageCall<'_>) -> String {
        let mut prompt = call.stage.prompt(call.identity, call.inputs);
        if call.strict {
            prompt.push_str(STRICT_OUTPUT_INSTRUCTION);
        }
        prompt
    }
}

#[async_trait]
impl StageFunction for ModelStage {
    async fn call(&self, call: StageCall<'_>) -> Result<StageOutput> {
        let prompt = Self::render(&call);
        let response = self
            .invoker
            .invoke(call.model, &prompt, &call.stage.schema())
            .await?;

        let cost_usd = response
            .cost_usd
            .unwrap_or_else(|| call.model.estimate_cost(&response.usage));

        debug!(
            stage = %call.stage,
            model = %response.model,
            attempt = call.attempt,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            cost_usd,
            "Model replied"
        );

        let payload = extract_structured(&response.content, call.stage.as_str())?;
        Ok(StageOutput {
            payload,
            cost_usd,
            usage: response.usage,
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// One function per stage. Every stage must be registered.
#[derive(Clone)]
pub struct StageRegistry {
    functions: BTreeMap<Stage, SharedStageFunction>,
}

impl StageRegistry {
    /// All six stages backed by the same model invoker
    pub fn from_invoker(invoker: SharedInvoker) -> Self {
        Self::uniform(Arc::new(ModelStage::new(invoker)))
    }

    pub fn uniform(function: SharedStageFunction) -> Self {
        Self {
            functions: Stage::ALL
                .into_iter()
                .map(|stage| (stage, Arc::clone(&function)))
                .collect(),
        }
    }

    /// Replace the function for one stage
    pub fn register(mut self, stage: Stage, function: SharedStageFunction) -> Self {
        self.functions.insert(stage, function);
        self
    }

    pub fn get(&self, stage: Stage) -> Result<&SharedStageFunction> {
        self.functions.get(&stage).ok_or_else(|| {
            ForgeError::stage_execution(stage.as_str(), "no stage function registered")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{RecordingStage, ScriptedInvoker};
    use crate::pipeline::types::StageInputs;
    use crate::routing::{ModelConfig, ModelTier};
    use crate::types::{ModelError, StageIdentity};
    use serde_json::json;

    fn model() -> ModelConfig {
        ModelConfig::new("gpt-4o-mini", ModelTier::Cheap, 1.0, &["extraction"])
    }

    fn identity() -> StageIdentity {
        StageIdentity {
            company: "Acme".to_string(),
            industry: "Tech".to_string(),
        }
    }

    #[tokio::test]
    async fn test_model_stage_extracts_and_estimates_cost() {
        let invoker = ScriptedInvoker::new();
        invoker.reply("```json\n{\"company_profile\": {}, \"confidence\": 0.9}\n```");
        let stage = ModelStage::new(invoker.clone());

        let identity = identity();
        let inputs = StageInputs::new("scale ops", json!({}));
        let model = model();
        let output = stage
            .call(StageCall {
                stage: Stage::Extraction,
                identity: &identity,
                inputs: &inputs,
                model: &model,
                attempt: 1,
                strict: false,
                fallback: false,
            })
            .await
            .unwrap();

        assert_eq!(output.payload["confidence"], 0.9);
        // 2000 tokens at $1 per million
        assert!((output.cost_usd - 0.002).abs() < 1e-12);

        let prompts = invoker.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].0, "gpt-4o-mini");
        assert!(prompts[0].1.contains("Company: Acme"));
        assert!(!prompts[0].1.contains("OUTPUT_RULES"));
    }

    #[tokio::test]
    async fn test_strict_call_appends_output_rules() {
        let invoker = ScriptedInvoker::new();
        let stage = ModelStage::new(invoker.clone());
        let identity = identity();
        let inputs = StageInputs::default();
        let model = model();

        stage
            .call(StageCall {
                stage: Stage::Polish,
                identity: &identity,
                inputs: &inputs,
                model: &model,
                attempt: 2,
                strict: true,
                fallback: false,
            })
            .await
            .unwrap();

        assert!(invoker.prompts()[0].1.contains("OUTPUT_RULES"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_transient() {
        let invoker = ScriptedInvoker::new();
        invoker.reply("I'm sorry, I cannot produce JSON today.");
        let stage = ModelStage::new(invoker);
        let identity = identity();
        let inputs = StageInputs::default();
        let model = model();

        let err = stage
            .call(StageCall {
                stage: Stage::Strategy,
                identity: &identity,
                inputs: &inputs,
                model: &model,
                attempt: 1,
                strict: false,
                fallback: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::TransientStage { .. }));
    }

    #[tokio::test]
    async fn test_model_errors_pass_through() {
        let invoker = ScriptedInvoker::new();
        invoker.fail(ModelError::fatal("401 unauthorized"));
        let stage = ModelStage::new(invoker);
        let identity = identity();
        let inputs = StageInputs::default();
        let model = model();

        let err = stage
            .call(StageCall {
                stage: Stage::Strategy,
                identity: &identity,
                inputs: &inputs,
                model: &model,
                attempt: 1,
                strict: false,
                fallback: false,
            })
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_registry_override() {
        let recording: SharedStageFunction = Arc::new(RecordingStage::new());
        let registry = StageRegistry::from_invoker(ScriptedInvoker::new())
            .register(Stage::Polish, Arc::clone(&recording));
        assert!(Arc::ptr_eq(registry.get(Stage::Polish).unwrap(), &recording));
        assert!(!Arc::ptr_eq(registry.get(Stage::Strategy).unwrap(), &recording));
    }
}
