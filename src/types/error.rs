//! Unified Error Type System
//!
//! Centralized error types for the pipeline, cache layer and model router.
//! Errors carry enough classification to decide between retrying a stage,
//! degrading a cache operation and failing a run.
//!
//! ## Error Categories
//!
//! - **Transient**: Temporary model-side issues (retry once)
//! - **RateLimit**: API rate limiting (retry after delay)
//! - **Network**: Connectivity issues (retry with backoff)
//! - **ParseError**: Malformed structured output (retry with stricter prompt)
//! - **Auth** / **BadRequest**: Fail fast
//!
//! ## Propagation Rules
//!
//! - `CacheUnavailable` never leaves the store boundary
//! - `TransientStage` is retried, then escalated to `StageExecution`
//! - `InvalidInput` and `Routing` are surfaced immediately

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Error categories for retry decisions on model invocations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited - wait then retry
    RateLimit,
    /// Authentication failed - fail fast
    Auth,
    /// Network/connectivity issues - retry with backoff
    Network,
    /// Invalid request - don't retry
    BadRequest,
    /// Structured output could not be parsed - retry with stricter instruction
    ParseError,
    /// Temporary server issues - retry
    Transient,
    /// Unknown error - treated as fatal
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Check if this category is worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Transient | Self::ParseError
        )
    }
}

// =============================================================================
// Model Error
// =============================================================================

/// Error returned by the model-invocation collaborator
#[derive(Debug, Clone)]
pub struct ModelError {
    pub category: ErrorCategory,
    pub message: String,
    /// Model that produced the error
    pub model: Option<String>,
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(model) = &self.model {
            write!(f, "[{}:{}] {}", model, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for ModelError {}

impl ModelError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            model: None,
        }
    }

    /// Transient failure (timeouts, 5xx, overloaded)
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    /// Fatal failure (auth, bad request)
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::BadRequest, message)
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn is_transient(&self) -> bool {
        self.category.is_transient()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps raw provider failures onto categories
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from a model endpoint
    pub fn classify(message: &str, model: &str) -> ModelError {
        let lower = message.to_lowercase();

        let category = if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
        {
            ErrorCategory::RateLimit
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
        {
            ErrorCategory::Auth
        } else if lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timed out")
            || lower.contains("timeout")
        {
            ErrorCategory::Network
        } else if lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("overloaded")
            || lower.contains("temporary")
        {
            ErrorCategory::Transient
        } else if lower.contains("400") || lower.contains("bad request") {
            ErrorCategory::BadRequest
        } else if lower.contains("parse") || lower.contains("json") {
            ErrorCategory::ParseError
        } else {
            ErrorCategory::Unknown
        };

        ModelError::new(category, message).model(model)
    }

    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, model: &str) -> ModelError {
        let category = match status {
            429 => ErrorCategory::RateLimit,
            401 | 403 => ErrorCategory::Auth,
            400 | 404 | 422 => ErrorCategory::BadRequest,
            408 | 500 | 502 | 503 | 504 => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        };
        ModelError::new(category, message).model(model)
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ForgeError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Request / Configuration Errors
    // -------------------------------------------------------------------------
    /// Malformed request or non-serializable key component
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unrecognized task type or a catalog gap
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Config error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Cache Errors
    // -------------------------------------------------------------------------
    /// Backend failure during a cache operation. Absorbed by the store.
    #[error("Cache unavailable ({tier} {operation}): {message}")]
    CacheUnavailable {
        tier: String,
        operation: String,
        message: String,
    },

    // -------------------------------------------------------------------------
    // Stage Errors
    // -------------------------------------------------------------------------
    /// Retryable stage failure (malformed output, timeout, transient model error)
    #[error("Transient failure in stage {stage}: {message}")]
    TransientStage { stage: String, message: String },

    /// Terminal stage failure that fails the run
    #[error("Stage {stage} failed: {message}")]
    StageExecution { stage: String, message: String },

    #[error("Model error: {0}")]
    Model(ModelError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Persistence Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<ModelError> for ForgeError {
    fn from(err: ModelError) -> Self {
        ForgeError::Model(err)
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl ForgeError {
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn cache_unavailable(
        tier: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CacheUnavailable {
            tier: tier.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn transient_stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientStage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn stage_execution(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Check if a stage attempt that failed with this error may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientStage { .. } | Self::Timeout { .. } => true,
            Self::Model(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Stage name attached to stage-level failures
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::TransientStage { stage, .. } | Self::StageExecution { stage, .. } => {
                Some(stage)
            }
            _ => None,
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| ForgeError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| ForgeError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_transient() {
        assert!(ErrorCategory::RateLimit.is_transient());
        assert!(ErrorCategory::Network.is_transient());
        assert!(ErrorCategory::ParseError.is_transient());
        assert!(!ErrorCategory::Auth.is_transient());
        assert!(!ErrorCategory::BadRequest.is_transient());
        assert!(!ErrorCategory::Unknown.is_transient());
    }

    #[test]
    fn test_classify_http_status() {
        let err = ErrorClassifier::classify_http_status(503, "overloaded", "gpt-4o");
        assert_eq!(err.category, ErrorCategory::Transient);
        assert_eq!(err.to_string(), "[gpt-4o:TRANSIENT] overloaded");

        let err = ErrorClassifier::classify_http_status(401, "bad key", "gpt-4o");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            ErrorClassifier::classify("Rate limit reached", "m").category,
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ErrorClassifier::classify("connection reset by peer", "m").category,
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorClassifier::classify("something odd", "m").category,
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_forge_error_transient() {
        assert!(ForgeError::transient_stage("strategy", "bad json").is_transient());
        assert!(ForgeError::timeout("stage strategy", Duration::from_secs(1)).is_transient());
        assert!(ForgeError::Model(ModelError::transient("503")).is_transient());
        assert!(!ForgeError::Model(ModelError::fatal("400")).is_transient());
        assert!(!ForgeError::stage_execution("strategy", "boom").is_transient());
        assert!(!ForgeError::InvalidInput("x".into()).is_transient());
    }

    #[test]
    fn test_stage_accessor() {
        let err = ForgeError::stage_execution("polish", "boom");
        assert_eq!(err.stage(), Some("polish"));
        assert_eq!(err.to_string(), "Stage polish failed: boom");
        assert_eq!(ForgeError::Routing("x".into()).stage(), None);
    }

    #[test]
    fn test_result_ext_context() {
        let raw: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::other("disk full"));
        let err = raw.with_context("Failed to write entry").unwrap_err();
        assert_eq!(err.to_string(), "Storage error: Failed to write entry: disk full");
    }
}
