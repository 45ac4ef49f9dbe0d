//! Core types shared across the crate.

pub mod error;
pub mod request;

pub use error::{ErrorCategory, ErrorClassifier, ForgeError, ModelError, Result, ResultExt};
pub use request::{AnalysisRequest, StageIdentity};
