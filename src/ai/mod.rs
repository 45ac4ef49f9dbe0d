//! Model invocation, structured output extraction and run metrics.

pub mod extract;
pub mod metrics;
pub mod provider;
pub mod timeout;

pub use extract::extract_structured;
pub use metrics::{MetricsSummary, RunMetrics, SharedMetrics};
pub use provider::{
    ModelInvoker, ModelResponse, OpenAiInvoker, ResponseTiming, SharedInvoker, TokenUsage,
};
pub use timeout::{TimeoutConfig, with_timeout};
