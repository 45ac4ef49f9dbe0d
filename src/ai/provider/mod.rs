//! Model Invocation Abstraction
//!
//! Defines the `ModelInvoker` trait: one call against a routed model,
//! returning raw text plus usage so stages can parse and cost it.

mod openai;

pub use openai::OpenAiInvoker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::routing::ModelConfig;
use crate::types::Result;

// =============================================================================
// Model Response with Usage Metrics
// =============================================================================

#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Raw completion text. Structured extraction happens in the stage.
    pub content: String,
    pub usage: TokenUsage,
    /// Cost reported by the provider, if any
    pub cost_usd: Option<f64>,
    pub timing: ResponseTiming,
    /// Model that served the request
    pub model: String,
}

impl ModelResponse {
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            cost_usd: None,
            timing: ResponseTiming::default(),
            model: model.into(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Token usage metrics for cost tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTiming {
    /// Wall clock milliseconds
    pub total_ms: u64,
}

impl ResponseTiming {
    pub fn from_duration(duration: std::time::Duration) -> Self {
        Self {
            total_ms: duration.as_millis() as u64,
        }
    }
}

// =============================================================================
// Model Invoker Trait
// =============================================================================

/// External model-invocation collaborator.
///
/// Failures are reported as [`ForgeError::Model`](crate::types::ForgeError::Model)
/// with a category so the retry loop can tell transient from fatal.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, model: &ModelConfig, prompt: &str, schema: &Value)
    -> Result<ModelResponse>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

pub type SharedInvoker = Arc<dyn ModelInvoker>;
